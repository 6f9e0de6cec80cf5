//! Aggregation query engine. Pure functions over the filtered
//! observation set: pagination with full-count metadata, and the
//! same-user/same-window/same-day grouped collapse.

use std::{collections::HashMap, sync::Arc};

use chrono::NaiveDate;

use crate::{
    api::{GroupedRow, ObservationRow},
    model::Observation,
};

/// Normalized pagination request. `page` is 1-based.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: u64,
    pub per_page: u64,
}

impl PageRequest {
    pub fn new(page: Option<u64>, per_page: Option<u64>, cap: u64) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(cap).clamp(1, cap),
        }
    }
}

/// Pagination metadata computed over the full match set, surfaced as
/// response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMeta {
    pub total_count: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

fn paginate<T>(items: Vec<T>, request: PageRequest) -> (Vec<T>, PageMeta) {
    let total_count = items.len() as u64;
    let meta = PageMeta {
        total_count,
        page: request.page,
        per_page: request.per_page,
        total_pages: total_count.div_ceil(request.per_page),
    };
    let start = (request.page - 1).saturating_mul(request.per_page) as usize;
    let page: Vec<T> = items
        .into_iter()
        .skip(start)
        .take(request.per_page as usize)
        .collect();
    (page, meta)
}

/// Raw observations, newest first, each row carrying its own duration.
pub fn ungrouped_report(
    mut observations: Vec<Observation>,
    request: PageRequest,
) -> (Vec<ObservationRow>, PageMeta) {
    observations.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
    let (page, meta) = paginate(observations, request);
    (page.iter().map(ObservationRow::from).collect(), meta)
}

struct GroupAccumulator {
    row: GroupedRow,
    /// captured-at of the member currently providing the representative
    /// category/productivity.
    latest: chrono::DateTime<chrono::Utc>,
}

/// Collapses observations by (user, window title, calendar day). The
/// representative category/productivity come from the latest member.
pub fn grouped_report(
    observations: Vec<Observation>,
    request: PageRequest,
) -> (Vec<GroupedRow>, PageMeta) {
    let mut groups: HashMap<(i64, Arc<str>, NaiveDate), GroupAccumulator> = HashMap::new();

    for observation in observations {
        let key = (
            observation.monitored_user_id,
            observation.window_title.clone(),
            observation.captured_at.date_naive(),
        );
        match groups.get_mut(&key) {
            None => {
                groups.insert(
                    key,
                    GroupAccumulator {
                        latest: observation.captured_at,
                        row: GroupedRow {
                            monitored_user_id: observation.monitored_user_id,
                            window_title: observation.window_title.to_string(),
                            day: observation.captured_at.date_naive(),
                            first_seen: observation.captured_at,
                            last_seen: observation.captured_at,
                            min_idle_seconds: observation.idle_seconds,
                            observation_count: 1,
                            total_duration_seconds: observation.duration_seconds as u64,
                            has_screenshot: observation.has_screenshot(),
                            category: observation.category.to_string(),
                            productivity: observation.productivity,
                        },
                    },
                );
            }
            Some(group) => {
                let row = &mut group.row;
                row.first_seen = row.first_seen.min(observation.captured_at);
                row.last_seen = row.last_seen.max(observation.captured_at);
                row.min_idle_seconds = row.min_idle_seconds.min(observation.idle_seconds);
                row.observation_count += 1;
                row.total_duration_seconds += observation.duration_seconds as u64;
                row.has_screenshot |= observation.has_screenshot();
                if observation.captured_at >= group.latest {
                    group.latest = observation.captured_at;
                    row.category = observation.category.to_string();
                    row.productivity = observation.productivity;
                }
            }
        }
    }

    let mut rows: Vec<GroupedRow> = groups.into_values().map(|g| g.row).collect();
    rows.sort_by(|a, b| {
        b.last_seen
            .cmp(&a.last_seen)
            .then_with(|| a.window_title.cmp(&b.window_title))
    });
    paginate(rows, request)
}
