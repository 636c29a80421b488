//! Gates evaluated between connecting and asking for confirmation.

use std::cmp::Ordering;

use crate::daemon::Inventory;
use crate::migration::PreconditionError;

const DEFAULT_PROFILE: &str = "default";

/// Compares dotted numeric versions; missing trailing components count as `0`.
pub fn compare_versions(left: &str, right: &str) -> Result<Ordering, PreconditionError> {
    let left = components(left)?;
    let right = components(right)?;
    let length = left.len().max(right.len());
    let padded = |parts: &[u64], index: usize| parts.get(index).copied().unwrap_or(0);
    Ok((0..length)
        .map(|index| padded(&left, index).cmp(&padded(&right, index)))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal))
}

fn components(version: &str) -> Result<Vec<u64>, PreconditionError> {
    version
        .trim()
        .split('.')
        .map(|component| {
            component
                .parse::<u64>()
                .map_err(|_| PreconditionError::InvalidVersion {
                    version: version.to_owned(),
                    component: component.to_owned(),
                })
        })
        .collect()
}

/// Refuses a source that runs a newer daemon than the destination.
pub fn check_version_order(source: &str, destination: &str) -> Result<(), PreconditionError> {
    if compare_versions(source, destination)? == Ordering::Greater {
        return Err(PreconditionError::VersionOrder {
            source_version: source.to_owned(),
            destination_version: destination.to_owned(),
        });
    }
    Ok(())
}

/// Whether an installation manages nothing worth migrating.
///
/// Only the stock `default` profile may exist; every other resource counts.
#[must_use]
pub fn is_unused(inventory: &Inventory) -> bool {
    inventory.containers.is_empty()
        && inventory.images.is_empty()
        && inventory.storage_pools.is_empty()
        && inventory.managed_networks().next().is_none()
        && inventory
            .profiles
            .iter()
            .all(|profile| profile == DEFAULT_PROFILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::{Network, StoragePool};
    use rstest::rstest;

    #[rstest]
    #[case::older("3.0.1", "3.18.0", Ordering::Less)]
    #[case::numeric_not_lexical("3.9", "3.10", Ordering::Less)]
    #[case::padded("3.0", "3.0.0", Ordering::Equal)]
    #[case::newer("4.0.0", "3.18.0", Ordering::Greater)]
    #[case::longer_wins("3.0.0.1", "3.0", Ordering::Greater)]
    fn orders_dotted_versions(#[case] left: &str, #[case] right: &str, #[case] expected: Ordering) {
        assert_eq!(compare_versions(left, right).expect("valid"), expected);
    }

    #[rstest]
    #[case::suffix("3.0.0~beta")]
    #[case::empty_component("3..1")]
    #[case::empty("")]
    fn rejects_non_numeric_components(#[case] version: &str) {
        let error = compare_versions(version, "3.0").expect_err("invalid");
        assert!(matches!(error, PreconditionError::InvalidVersion { .. }));
    }

    #[test]
    fn refuses_downgrades() {
        let error = check_version_order("4.0.0", "3.18.0").expect_err("refused");
        assert!(matches!(error, PreconditionError::VersionOrder { .. }));
        check_version_order("3.0.1", "3.0.1").expect("equal versions migrate");
    }

    fn network(name: &str, managed: bool) -> Network {
        Network {
            name: name.to_owned(),
            managed,
            kind: "bridge".to_owned(),
        }
    }

    #[rstest]
    #[case::pristine(Inventory { profiles: vec!["default".to_owned()], ..Inventory::default() }, true)]
    #[case::unmanaged_network(
        Inventory { networks: Some(vec![network("eth0", false)]), ..Inventory::default() },
        true
    )]
    #[case::container(Inventory { containers: vec!["c1".to_owned()], ..Inventory::default() }, false)]
    #[case::image(Inventory { images: vec!["abc".to_owned()], ..Inventory::default() }, false)]
    #[case::custom_profile(
        Inventory { profiles: vec!["default".to_owned(), "gpu".to_owned()], ..Inventory::default() },
        false
    )]
    #[case::managed_network(
        Inventory { networks: Some(vec![network("lxdbr0", true)]), ..Inventory::default() },
        false
    )]
    #[case::storage_pool(
        Inventory {
            storage_pools: vec![StoragePool {
                name: "default".to_owned(),
                driver: "dir".to_owned(),
                config: Default::default(),
            }],
            ..Inventory::default()
        },
        false
    )]
    fn detects_unused_installations(#[case] inventory: Inventory, #[case] expected: bool) {
        assert_eq!(is_unused(&inventory), expected);
    }
}
