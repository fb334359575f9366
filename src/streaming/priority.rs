//! File ordering for a load round
//!
//! Each requested geometry adds its priority to the file that holds it.
//! Files are then fetched highest total first; equal totals keep the order
//! in which the files were first requested.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};

use crate::model::{GeometryId, StreamedGeometries};

/// Accumulated priority of one tile file
#[derive(Clone, Debug)]
pub struct FilePriority {
    pub file: String,
    pub priority: u64,
    /// Position of the file's first request, breaks ties
    pub order: usize,
}

impl Eq for FilePriority {}

impl PartialEq for FilePriority {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for FilePriority {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then earlier request first
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.order.cmp(&self.order))
    }
}

impl PartialOrd for FilePriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Files to fetch for one model, plus the full set of requested geometries
#[derive(Debug, Default)]
pub struct FilePlan {
    queue: BinaryHeap<FilePriority>,
    pub requested: BTreeSet<GeometryId>,
    /// Requested geometries with no descriptor or no file
    pub unresolved: Vec<GeometryId>,
}

impl FilePlan {
    /// Sum geometry priorities per file
    pub fn build(requested: &BTreeMap<GeometryId, u64>, geometries: &StreamedGeometries) -> Self {
        let mut totals: HashMap<&str, (u64, usize)> = HashMap::new();
        let mut plan = FilePlan::default();

        for (&id, &priority) in requested {
            plan.requested.insert(id);
            let Some(file) = geometries.get(&id).and_then(|g| g.geometry_file.as_deref()) else {
                plan.unresolved.push(id);
                continue;
            };
            let next_order = totals.len();
            let entry = totals.entry(file).or_insert((0, next_order));
            entry.0 += priority;
        }

        plan.queue = totals
            .into_iter()
            .map(|(file, (priority, order))| FilePriority {
                file: file.to_string(),
                priority,
                order,
            })
            .collect();
        plan
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Highest priority file still to process
    pub fn pop(&mut self) -> Option<FilePriority> {
        self.queue.pop()
    }

    /// Drain in processing order
    pub fn into_sorted(mut self) -> Vec<FilePriority> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(f) = self.queue.pop() {
            out.push(f);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Aabb;
    use crate::model::StreamedGeometry;

    fn geometries(files: &[(GeometryId, Option<&str>)]) -> StreamedGeometries {
        files
            .iter()
            .map(|&(id, file)| {
                (
                    id,
                    StreamedGeometry {
                        geometry_file: file.map(str::to_string),
                        bounding_box: Aabb::default(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_higher_priority_file_first() {
        let geoms = geometries(&[(1, Some("f1")), (2, Some("f2")), (3, Some("f2"))]);
        let requested = BTreeMap::from([(1, 50), (2, 100), (3, 20)]);

        let order: Vec<(String, u64)> = FilePlan::build(&requested, &geoms)
            .into_sorted()
            .into_iter()
            .map(|f| (f.file, f.priority))
            .collect();
        assert_eq!(order, vec![("f2".to_string(), 120), ("f1".to_string(), 50)]);
    }

    #[test]
    fn test_ties_keep_request_order() {
        let geoms = geometries(&[(1, Some("b")), (2, Some("a")), (3, Some("c"))]);
        let requested = BTreeMap::from([(1, 5), (2, 5), (3, 5)]);

        let files: Vec<String> = FilePlan::build(&requested, &geoms)
            .into_sorted()
            .into_iter()
            .map(|f| f.file)
            .collect();
        assert_eq!(files, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_unresolved_geometries() {
        let geoms = geometries(&[(1, Some("f")), (2, None)]);
        let requested = BTreeMap::from([(1, 1), (2, 1), (7, 1)]);

        let plan = FilePlan::build(&requested, &geoms);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.unresolved, vec![2, 7]);
        assert_eq!(plan.requested.len(), 3);
    }
}
