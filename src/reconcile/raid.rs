use crate::constants::sizes;
use crate::devicetree::device::{DeviceId, Format, RaidLevel};
use crate::devicetree::ops::MdRequest;
use crate::entity::size::{self, Size};
use crate::errors::ReconcileError;
use crate::manifest::RaidSpec;

/// Splits `members` into `(active, spare)` counts. Either count may be
/// derived from the other; both given must add up to `members`.
pub fn raid_counts(members: u32, active: Option<u32>, spare: Option<u32>) -> Result<(u32, u32), ReconcileError> {
    let mismatch = |active: u32, spare: u32| {
        ReconcileError::RaidCount(format!(
            "{active} active and {spare} spare devices do not match {members} members"
        ))
    };

    match (active, spare) {
        (Some(active), Some(spare)) if active + spare == members => Ok((active, spare)),
        (Some(active), Some(spare)) => Err(mismatch(active, spare)),
        (Some(active), None) if active <= members => Ok((active, members - active)),
        (Some(active), None) => Err(mismatch(active, 0)),
        (None, Some(spare)) if spare < members => Ok((members - spare, spare)),
        (None, Some(spare)) => Err(mismatch(0, spare)),
        (None, None) => Ok((members, 0)),
    }
}

/// Chunk size of a new array, defaulted for striped levels
pub fn chunk_size(level: RaidLevel, declared: Option<&str>) -> Result<Option<Size>, ReconcileError> {
    let Some(declared) = declared else {
        return Ok(level
            .uses_chunks()
            .then_some(Size(sizes::MD_DEFAULT_CHUNK)));
    };

    let chunk = size::parse_human_bytes(declared)?;
    if chunk == Size::ZERO || chunk.bytes() % sizes::MD_CHUNK_ALIGN != 0 {
        return Err(ReconcileError::ChunkSize(format!(
            "raid chunk size {declared} is not a multiple of 4 KiB"
        )));
    }

    Ok(Some(chunk))
}

/// Validates the raid settings of a new array named `name` over `members`
pub fn md_request(name: &str, raid: &RaidSpec, members: Vec<DeviceId>) -> Result<MdRequest, ReconcileError> {
    let level: RaidLevel = raid
        .raid_level
        .as_deref()
        .ok_or(ReconcileError::BadManifest(format!(
            "raid array '{name}' requires raid_level"
        )))?
        .parse()?;

    let (active, spare) = raid_counts(members.len() as u32, raid.raid_device_count, raid.raid_spare_count)?;
    if active < level.min_members() {
        return Err(ReconcileError::RaidCount(format!(
            "{} requires at least {} active devices, got {active}",
            level.as_str(),
            level.min_members()
        )));
    }

    Ok(MdRequest {
        name: name.to_string(),
        level,
        members,
        active,
        spare,
        chunk_size: chunk_size(level, raid.raid_chunk_size.as_deref())?,
        metadata: raid.raid_metadata_version.clone(),
        format: Format::none(),
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::constants::sizes::KIB;

    #[test]
    fn test_raid_counts() {
        struct Test {
            members: u32,
            active: Option<u32>,
            spare: Option<u32>,
            expected: Option<(u32, u32)>,
        }

        let tests = vec![
            Test {
                members: 4,
                active: None,
                spare: None,
                expected: Some((4, 0)),
            },
            Test {
                members: 4,
                active: Some(3),
                spare: None,
                expected: Some((3, 1)),
            },
            Test {
                members: 4,
                active: None,
                spare: Some(1),
                expected: Some((3, 1)),
            },
            Test {
                members: 4,
                active: Some(2),
                spare: Some(2),
                expected: Some((2, 2)),
            },
            Test {
                members: 4,
                active: Some(3),
                spare: Some(3),
                expected: None,
            },
            Test {
                members: 2,
                active: Some(3),
                spare: None,
                expected: None,
            },
            Test {
                members: 2,
                active: None,
                spare: Some(2),
                expected: None,
            },
        ];

        for test in tests {
            let result = raid_counts(test.members, test.active, test.spare);
            match test.expected {
                Some(expected) => {
                    let (active, spare) = result.expect("unexpected count error");
                    assert_eq!(expected, (active, spare));
                    assert_eq!(test.members, active + spare);
                }
                None => assert_matches!(result, Err(ReconcileError::RaidCount(_))),
            }
        }
    }

    #[test]
    fn test_chunk_size() {
        assert_eq!(Some(Size(512 * KIB)), chunk_size(RaidLevel::Raid5, None).unwrap());
        assert_eq!(None, chunk_size(RaidLevel::Raid1, None).unwrap());
        assert_eq!(Some(Size(64 * KIB)), chunk_size(RaidLevel::Raid0, Some("64 KiB")).unwrap());
        assert_matches!(chunk_size(RaidLevel::Raid0, Some("6 KiB")), Err(ReconcileError::ChunkSize(_)));
        assert_matches!(chunk_size(RaidLevel::Raid0, Some("0")), Err(ReconcileError::ChunkSize(_)));
    }

    #[test]
    fn test_md_request() {
        let raid = RaidSpec {
            raid_level: Some("raid5".to_string()),
            raid_spare_count: Some(1),
            ..Default::default()
        };

        let members = vec![DeviceId(1), DeviceId(2), DeviceId(3)];
        assert_matches!(
            md_request("data", &raid, members),
            Err(ReconcileError::RaidCount(msg)) if msg.contains("at least 3")
        );

        let members = vec![DeviceId(1), DeviceId(2), DeviceId(3), DeviceId(4)];
        let request = md_request("data", &raid, members).expect("valid raid5 rejected");
        assert_eq!((3, 1), (request.active, request.spare));
        assert_eq!(RaidLevel::Raid5, request.level);
    }
}
