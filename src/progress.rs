use crate::dataset::Record;
use crate::filter::View;
use serde::{Deserialize, Serialize};

/// Visit counts for whatever rows are currently shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub total: usize,
    pub visited: usize,
    pub pending: usize,
}

impl Progress {
    pub fn of_records<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        let (total, visited) = records
            .into_iter()
            .fold((0, 0), |(total, visited), r| (total + 1, visited + r.visited as usize));
        Self {
            total,
            visited,
            pending: total - visited,
        }
    }

    pub fn of_view(view: &View) -> Self {
        Self::of_records(view.records())
    }

    /// `None` for an empty view.
    pub fn completion(&self) -> Option<f64> {
        (self.total > 0).then(|| self.visited as f64 / self.total as f64)
    }
}
