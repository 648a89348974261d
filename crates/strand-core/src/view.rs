use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::task::{Address, Task};

/// Visibility/status selector for the task list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    #[default]
    All,
    Public,
    Private,
    Pending,
    Completed,
}

impl std::str::FromStr for FilterKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            other => Err(anyhow!("unknown filter: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Created,
    Content,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    Asc,
    #[default]
    Desc,
}

/// Parses a `key[:dir]` sort spec, e.g. `created:asc` or `content`.
pub fn parse_sort_spec(spec: &str) -> anyhow::Result<(SortKey, SortDir)> {
    let (key_text, dir_text) = match spec.split_once(':') {
        Some((k, d)) => (k, Some(d)),
        None => (spec, None),
    };

    let key = match key_text.to_ascii_lowercase().as_str() {
        "created" | "date" => SortKey::Created,
        "content" | "alpha" => SortKey::Content,
        other => return Err(anyhow!("unknown sort key: {other}")),
    };

    let dir = match dir_text {
        None => SortDir::default(),
        Some(text) => match text.to_ascii_lowercase().as_str() {
            "asc" => SortDir::Asc,
            "desc" => SortDir::Desc,
            other => return Err(anyhow!("unknown sort direction: {other}")),
        },
    };

    Ok((key, dir))
}

/// Everything governing what the user currently sees, held as one
/// serializable value and passed into the pipeline as pure input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewState {
    pub filter: FilterKind,
    pub sort_key: SortKey,
    pub sort_dir: SortDir,
    pub search: String,
    pub page: usize,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            filter: FilterKind::default(),
            sort_key: SortKey::default(),
            sort_dir: SortDir::default(),
            search: String::new(),
            page: 1,
        }
    }
}

/// A task is visible to an identity when it is public or owned by that
/// identity. Anonymous callers see only public tasks.
pub fn visible_to(task: &Task, identity: Option<&Address>) -> bool {
    !task.private || identity.is_some_and(|addr| task.owner == *addr)
}

fn passes_filter(task: &Task, filter: FilterKind, identity: Option<&Address>) -> bool {
    match filter {
        FilterKind::All => visible_to(task, identity),
        FilterKind::Public => !task.private,
        FilterKind::Private => {
            task.private && identity.is_some_and(|addr| task.owner == *addr)
        }
        FilterKind::Pending => !task.completed && visible_to(task, identity),
        FilterKind::Completed => task.completed && visible_to(task, identity),
    }
}

/// Case-insensitive subsequence match: every query character must
/// appear in the content in order, not necessarily contiguous. "tsk"
/// matches "task"; "kst" does not.
pub fn fuzzy_matches(content: &str, query: &str) -> bool {
    let content = content.to_lowercase();
    let query = query.to_lowercase();

    let mut rest = content.as_str();
    for ch in query.chars() {
        match rest.find(ch) {
            Some(idx) => rest = &rest[idx + ch.len_utf8()..],
            None => return false,
        }
    }
    true
}

/// The filter/search/sort pipeline. Pure: the output depends only on
/// the inputs, and never contains a task the identity is not
/// authorized to see, whatever the selected filter.
pub fn apply(tasks: &[Task], view: &ViewState, identity: Option<&Address>) -> Vec<Task> {
    let mut out: Vec<Task> = tasks
        .iter()
        .filter(|task| passes_filter(task, view.filter, identity))
        .cloned()
        .collect();

    let query = view.search.trim();
    if !query.is_empty() {
        out.retain(|task| fuzzy_matches(&task.content, query));
    }

    // Ties compare Equal, so the stable sort preserves input order.
    match (view.sort_key, view.sort_dir) {
        (SortKey::Created, SortDir::Asc) => out.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        (SortKey::Created, SortDir::Desc) => out.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        (SortKey::Content, SortDir::Asc) => out.sort_by(|a, b| a.content.cmp(&b.content)),
        (SortKey::Content, SortDir::Desc) => out.sort_by(|a, b| b.content.cmp(&a.content)),
    }

    trace!(
        total = tasks.len(),
        visible = out.len(),
        filter = ?view.filter,
        "applied view pipeline"
    );
    out
}

/// Total page count for a list of `len` items: ceil(len / page_size).
pub fn total_pages(len: usize, page_size: usize) -> usize {
    len.div_ceil(page_size.max(1))
}

/// The 1-based page slice. A page past the end yields an empty slice
/// rather than an error; the caller disables out-of-range navigation.
pub fn page_slice<T>(items: &[T], page: usize, page_size: usize) -> &[T] {
    let page_size = page_size.max(1);
    let start = page.max(1).saturating_sub(1).saturating_mul(page_size);
    if start >= items.len() {
        return &[];
    }
    let end = start.saturating_add(page_size).min(items.len());
    &items[start..end]
}

#[cfg(test)]
mod tests {
    use super::{
        FilterKind, SortDir, SortKey, ViewState, apply, fuzzy_matches, page_slice,
        parse_sort_spec, total_pages,
    };
    use crate::task::{Address, Task, TaskId};

    fn task(id: &str, content: &str, private: bool, owner: &str, completed: bool) -> Task {
        let mut t = Task::new(
            TaskId::new(id),
            content.to_string(),
            private,
            Address::new(owner),
            0,
        );
        t.completed = completed;
        t
    }

    fn sample() -> Vec<Task> {
        let mut a = task("A", "Buy milk", false, "0xother", false);
        a.created_at = 10;
        let mut b = task("B", "Secret", true, "0xU", true);
        b.created_at = 20;
        b.completed_at = 25;
        let mut c = task("C", "Walk dog", false, "0xother", true);
        c.created_at = 30;
        c.completed_at = 35;
        vec![a, b, c]
    }

    fn view(filter: FilterKind) -> ViewState {
        ViewState {
            filter,
            ..ViewState::default()
        }
    }

    #[test]
    fn no_filter_leaks_foreign_private_tasks() {
        let mut tasks = sample();
        tasks.push(task("D", "Their secret", true, "0xsomeoneelse", false));
        let me = Address::new("0xU");

        for filter in [
            FilterKind::All,
            FilterKind::Public,
            FilterKind::Private,
            FilterKind::Pending,
            FilterKind::Completed,
        ] {
            let out = apply(&tasks, &view(filter), Some(&me));
            assert!(
                out.iter().all(|t| !t.private || t.owner == me),
                "filter {filter:?} leaked a foreign private task"
            );
        }
    }

    #[test]
    fn pending_and_completed_partition_the_all_set() {
        let tasks = sample();
        let me = Address::new("0xU");

        let all = apply(&tasks, &view(FilterKind::All), Some(&me));
        let pending = apply(&tasks, &view(FilterKind::Pending), Some(&me));
        let completed = apply(&tasks, &view(FilterKind::Completed), Some(&me));

        assert_eq!(pending.len() + completed.len(), all.len());
        let mut union: Vec<_> = pending.iter().chain(&completed).map(|t| &t.id).collect();
        union.sort();
        union.dedup();
        let mut all_ids: Vec<_> = all.iter().map(|t| &t.id).collect();
        all_ids.sort();
        assert_eq!(union, all_ids);
    }

    #[test]
    fn completed_filter_scenario_sorted_newest_first() {
        let tasks = sample();
        let me = Address::new("0xU");

        let out = apply(&tasks, &view(FilterKind::Completed), Some(&me));
        let ids: Vec<&str> = out.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["C", "B"]);
    }

    #[test]
    fn private_filter_requires_ownership_case_insensitively() {
        let tasks = sample();
        let out = apply(&tasks, &view(FilterKind::Private), Some(&Address::new("0xu")));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id.as_str(), "B");

        let out = apply(&tasks, &view(FilterKind::Private), None);
        assert!(out.is_empty());
    }

    #[test]
    fn fuzzy_is_a_superset_of_substring() {
        assert!(fuzzy_matches("task", "tsk"));
        assert!(!fuzzy_matches("task", "kst"));
        // Every substring match also passes the fuzzy match.
        assert!(fuzzy_matches("walk the dog", "the dog"));
        assert!(fuzzy_matches("Walk The Dog", "walk"));
        assert!(fuzzy_matches("anything", ""));
    }

    #[test]
    fn search_narrows_the_filtered_set() {
        let tasks = sample();
        let me = Address::new("0xU");
        let state = ViewState {
            search: "wlkdg".to_string(),
            ..view(FilterKind::All)
        };
        let out = apply(&tasks, &state, Some(&me));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id.as_str(), "C");
    }

    #[test]
    fn sort_is_stable_and_reversible() {
        let tasks = sample();
        let me = Address::new("0xU");

        let asc = ViewState {
            sort_key: SortKey::Created,
            sort_dir: SortDir::Asc,
            ..view(FilterKind::All)
        };
        let desc = ViewState {
            sort_dir: SortDir::Desc,
            ..asc.clone()
        };

        let up = apply(&tasks, &asc, Some(&me));
        let mut down = apply(&tasks, &desc, Some(&me));
        down.reverse();

        let up_ids: Vec<&str> = up.iter().map(|t| t.id.as_str()).collect();
        let down_ids: Vec<&str> = down.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(up_ids, down_ids);
    }

    #[test]
    fn content_sort_orders_lexicographically() {
        let tasks = sample();
        let me = Address::new("0xU");
        let state = ViewState {
            sort_key: SortKey::Content,
            sort_dir: SortDir::Asc,
            ..view(FilterKind::All)
        };
        let out = apply(&tasks, &state, Some(&me));
        let contents: Vec<&str> = out.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, ["Buy milk", "Secret", "Walk dog"]);
    }

    #[test]
    fn pagination_reconstructs_the_sequence() {
        let items: Vec<u32> = (0..10).collect();
        assert_eq!(total_pages(items.len(), 3), 4);

        let mut joined = Vec::new();
        for page in 1..=total_pages(items.len(), 3) {
            joined.extend_from_slice(page_slice(&items, page, 3));
        }
        assert_eq!(joined, items);
    }

    #[test]
    fn page_past_the_end_is_empty() {
        let items = ["A", "B", "C", "D"];
        assert_eq!(page_slice(&items, 1, 2), ["A", "B"]);
        assert_eq!(page_slice(&items, 2, 2), ["C", "D"]);
        assert_eq!(total_pages(items.len(), 2), 2);
        assert!(page_slice(&items, 3, 2).is_empty());
    }

    #[test]
    fn sort_spec_parsing() {
        assert_eq!(
            parse_sort_spec("created:asc").expect("spec"),
            (SortKey::Created, SortDir::Asc)
        );
        assert_eq!(
            parse_sort_spec("content").expect("spec"),
            (SortKey::Content, SortDir::Desc)
        );
        assert!(parse_sort_spec("due:asc").is_err());
    }
}
