//! Cascade plan for batch deletion.
//!
//! Dependent relations are listed once, in deletion order, and every delete
//! statement the repository issues is generated from that list. Foreign keys
//! are enforced, so a relation must be emptied before the relation it
//! references.

use crate::models::BatchStatus;

/// How rows of a dependent relation are tied back to a batch.
#[derive(Debug)]
pub(crate) enum Key {
    /// The relation holds the batch identifier itself.
    Direct(&'static str),
    /// The relation references an intermediate relation keyed by batch.
    Through {
        column: &'static str,
        via: &'static str,
        via_key: &'static str,
        via_batch: &'static str,
    },
}

#[derive(Debug)]
pub(crate) struct Dependent {
    pub relation: &'static str,
    pub key: Key,
}

pub(crate) const PARENT: &str = "Batch";

pub(crate) const PLAN: &[Dependent] = &[
    Dependent {
        relation: "FileAttribute",
        key: Key::Through { column: "FileId", via: "File", via_key: "Id", via_batch: "BatchId" },
    },
    Dependent { relation: "BatchReadGroup", key: Key::Direct("BatchId") },
    Dependent { relation: "BatchReadUser", key: Key::Direct("BatchId") },
    Dependent { relation: "BatchAttribute", key: Key::Direct("BatchId") },
    Dependent { relation: "File", key: Key::Direct("BatchId") },
];

impl Dependent {
    fn owned_by(&self, batches: &str) -> String {
        match self.key {
            Key::Direct(column) => format!("{column} IN ({batches})"),
            Key::Through { column, via, via_key, via_batch } => {
                format!("{column} IN (SELECT {via_key} FROM {via} WHERE {via_batch} IN ({batches}))")
            },
        }
    }

    pub fn delete(&self, batches: &str) -> String {
        format!("DELETE FROM {} WHERE {}", self.relation, self.owned_by(batches))
    }

    pub fn count(&self, batches: &str) -> String {
        format!("SELECT COUNT(*) FROM {} WHERE {}", self.relation, self.owned_by(batches))
    }
}

pub(crate) fn delete_parent(batches: &str) -> String {
    format!("DELETE FROM {PARENT} WHERE Id IN ({batches})")
}

/// Which batches a cascade applies to, as a subquery yielding identifiers.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Selection {
    /// The single batch bound to the first statement parameter.
    One,
    /// Committed batches missing from `temp.retained`.
    Orphaned,
    Uncommitted,
}

impl Selection {
    pub fn sql(self) -> String {
        let committed = BatchStatus::COMMITTED;
        match self {
            Self::One => "?1".to_string(),
            Self::Orphaned => {
                format!("SELECT Id FROM {PARENT} WHERE Status = {committed} AND Id NOT IN (SELECT Id FROM temp.retained)")
            },
            Self::Uncommitted => format!("SELECT Id FROM {PARENT} WHERE Status <> {committed}"),
        }
    }

    pub fn binds_id(self) -> bool {
        matches!(self, Self::One)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intermediate_relations_are_deleted_later() {
        for (position, dependent) in PLAN.iter().enumerate() {
            if let Key::Through { via, .. } = dependent.key {
                let via_position = PLAN.iter().position(|d| d.relation == via).unwrap();
                assert!(via_position > position, "{} must be emptied before {via}", dependent.relation);
            }
        }
    }

    #[test]
    fn test_generated_statements() {
        assert_eq!(PLAN[1].delete("?1"), "DELETE FROM BatchReadGroup WHERE BatchId IN (?1)");
        assert_eq!(
            PLAN[0].count("?1"),
            "SELECT COUNT(*) FROM FileAttribute WHERE FileId IN (SELECT Id FROM File WHERE BatchId IN (?1))"
        );
        assert_eq!(
            delete_parent(&Selection::Uncommitted.sql()),
            "DELETE FROM Batch WHERE Id IN (SELECT Id FROM Batch WHERE Status <> 3)"
        );
    }
}
