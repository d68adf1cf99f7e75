use super::types::{Partition, PartitionSet};
use rand::Rng;
use rand::seq::IndexedRandom;

/// Picks a partition uniformly at random among the non-draining ones.
///
/// Returns `None` when the set is empty or every partition is draining.
pub fn select_random(partitions: &PartitionSet) -> Option<&Partition> {
    select_random_with(partitions, &mut rand::rng())
}

/// Same as [`select_random`] with a caller-supplied random source.
pub fn select_random_with<'a, R>(partitions: &'a PartitionSet, rng: &mut R) -> Option<&'a Partition>
where
    R: Rng + ?Sized,
{
    let routable = partitions
        .iter()
        .filter(|partition| !partition.is_draining)
        .collect::<Vec<_>>();
    routable.choose(rng).copied()
}

/// Finds the partition with exactly `partition_id`, draining or not.
pub fn select_by_id<'a>(partitions: &'a PartitionSet, partition_id: &str) -> Option<&'a Partition> {
    partitions.iter().find(|partition| partition.id == partition_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashMap;

    fn set(partitions: &[(&str, bool)]) -> PartitionSet {
        PartitionSet::new(
            partitions
                .iter()
                .map(|(id, draining)| {
                    Partition::new("orders", *id, format!("http://{id}")).draining(*draining)
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn random_never_picks_draining() {
        let partitions = set(&[("p1", false), ("p2", true), ("p3", true)]);
        for _ in 0..500 {
            assert_eq!(select_random(&partitions).unwrap().id, "p1");
        }
    }

    #[test]
    fn random_is_none_when_all_draining_or_empty() {
        assert!(select_random(&set(&[("p1", true), ("p2", true)])).is_none());
        assert!(select_random(&PartitionSet::empty()).is_none());
    }

    #[test]
    fn random_spreads_across_live_partitions() {
        let partitions = set(&[("p1", false), ("p2", false), ("p3", true), ("p4", false)]);
        let mut rng = StdRng::seed_from_u64(7);
        let mut hits: HashMap<&str, usize> = HashMap::new();

        for _ in 0..3000 {
            let picked = select_random_with(&partitions, &mut rng).unwrap();
            *hits.entry(picked.id.as_str()).or_default() += 1;
        }

        assert!(!hits.contains_key("p3"));
        for id in ["p1", "p2", "p4"] {
            let count = hits[id];
            assert!((800..1200).contains(&count), "{id} picked {count} times");
        }
    }

    #[test]
    fn by_id_includes_draining() {
        let partitions = set(&[("p1", false), ("p2", true)]);

        assert_eq!(select_by_id(&partitions, "p2").unwrap().id, "p2");
        assert!(select_by_id(&partitions, "p2").unwrap().is_draining);
        assert!(select_by_id(&partitions, "p9").is_none());
        assert!(select_by_id(&partitions, "p").is_none());
    }
}
