//! Topology snapshot: the open partitions of a stream in hash-key order.

use tracing::debug;

use streamscale_client::{ClientResult, StreamManager};
use streamscale_core::{Partition, StreamDescription};

/// Open partitions of `desc`, sorted ascending by starting hash key.
pub fn open_partitions(desc: &StreamDescription) -> Vec<Partition> {
    let mut open: Vec<Partition> = desc
        .partitions
        .iter()
        .filter(|p| p.is_open())
        .cloned()
        .collect();
    open.sort_by(|a, b| a.starting_hash_key.cmp(&b.starting_hash_key));
    open
}

/// Describe the stream and return its open partitions in hash-key order.
pub async fn snapshot(manager: &dyn StreamManager, stream_name: &str) -> ClientResult<Vec<Partition>> {
    let desc = manager.describe_stream(stream_name).await?;
    let open = open_partitions(&desc);
    debug!(
        stream = %stream_name,
        total = desc.partitions.len(),
        open = open.len(),
        "topology snapshot"
    );
    Ok(open)
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamscale_core::{HashKey, StreamStatus};

    fn desc(partitions: Vec<Partition>) -> StreamDescription {
        StreamDescription {
            stream_name: "events".to_string(),
            status: StreamStatus::Active,
            partitions,
            shard_level_metrics: vec![],
        }
    }

    #[test]
    fn sorts_by_starting_hash_key() {
        let d = desc(vec![
            Partition::open("b", 50u64, 89u64),
            Partition::open("a", 10u64, 49u64),
            Partition::open("c", 90u64, 99u64),
        ]);
        let starts: Vec<HashKey> = open_partitions(&d)
            .into_iter()
            .map(|p| p.starting_hash_key)
            .collect();
        assert_eq!(starts, vec![HashKey::from(10u64), HashKey::from(50u64), HashKey::from(90u64)]);
    }

    #[test]
    fn sorting_is_numeric_for_wide_keys() {
        let wide: HashKey = "170141183460469231731687303715884105728".parse().unwrap();
        let narrow: HashKey = "99999999999999999999".parse().unwrap();
        let d = desc(vec![
            Partition::open("hi", wide.clone(), u128::MAX),
            Partition::open("lo", narrow.clone(), wide.as_biguint() - 1u32),
        ]);
        let ids: Vec<String> = open_partitions(&d).into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["lo", "hi"]);
    }

    #[test]
    fn closed_partitions_are_dropped() {
        let mut closed = Partition::open("parent", 0u64, 99u64);
        closed.ending_sequence_number = Some("49590".to_string());
        let d = desc(vec![
            closed,
            Partition::open("child-lo", 0u64, 49u64),
            Partition::open("child-hi", 50u64, 99u64),
        ]);
        let ids: Vec<String> = open_partitions(&d).into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["child-lo", "child-hi"]);
    }
}
