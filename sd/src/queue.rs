//! In-memory scheduling queue rebuilt from the store on startup
//!
//! Holds every incomplete story of the running session. Readiness follows
//! the same rule as the store's pending query: a `new` story is ready when
//! none of its dependencies is still outstanding or failed.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, warn};

use storystore::{Story, StoryStatus};

#[derive(Debug, Default)]
pub struct StoryQueue {
    stories: BTreeMap<String, Story>,
    failed: HashSet<String>,
}

impl StoryQueue {
    /// Build from the incomplete stories plus the ids of failed ones
    pub fn new(incomplete: Vec<Story>, failed: impl IntoIterator<Item = String>) -> Self {
        let queue = Self {
            stories: incomplete.into_iter().map(|s| (s.id.clone(), s)).collect(),
            failed: failed.into_iter().collect(),
        };
        debug!(stories = queue.stories.len(), failed = queue.failed.len(), "StoryQueue::new");
        queue
    }

    pub fn len(&self) -> usize {
        self.stories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stories.is_empty()
    }

    /// Add or replace a story
    ///
    /// A story moved back out of `failed` is no longer a blocker.
    pub fn insert(&mut self, story: Story) {
        if story.is_terminal() {
            self.apply_status(&story.id, story.status);
            return;
        }
        self.failed.remove(&story.id);
        self.stories.insert(story.id.clone(), story);
    }

    /// Track a status change; terminal stories leave the queue
    ///
    /// Returns false if the story is not in the queue.
    pub fn apply_status(&mut self, id: &str, status: StoryStatus) -> bool {
        match status {
            StoryStatus::Done => {
                self.failed.remove(id);
                self.stories.remove(id).is_some()
            }
            StoryStatus::Failed => {
                self.failed.insert(id.to_string());
                self.stories.remove(id).is_some()
            }
            _ => match self.stories.get_mut(id) {
                Some(story) => {
                    story.status = status;
                    true
                }
                None => false,
            },
        }
    }

    fn is_satisfied(&self, dep_id: &str) -> bool {
        !self.stories.contains_key(dep_id) && !self.failed.contains(dep_id)
    }

    /// Ready stories in scheduling order: priority descending, oldest first
    pub fn ready(&self) -> Vec<&Story> {
        let mut ready: Vec<&Story> = self
            .stories
            .values()
            .filter(|s| s.status == StoryStatus::New)
            .filter(|s| s.depends_on.iter().all(|dep| self.is_satisfied(dep)))
            .collect();
        ready.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        ready
    }

    /// Find a dependency cycle among queued stories
    ///
    /// Cyclic stories can never become ready. Returns the cycle path, ending
    /// with the node that closes it.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let graph: HashMap<&str, &Story> = self.stories.iter().map(|(id, s)| (id.as_str(), s)).collect();

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut cycle_path = Vec::new();

        // BTreeMap order keeps the reported cycle stable
        for id in self.stories.keys() {
            if !visited.contains(id.as_str())
                && has_cycle_dfs(id.as_str(), &graph, &mut visited, &mut rec_stack, &mut cycle_path)
            {
                return Some(cycle_path);
            }
        }
        None
    }

    /// Log a warning if the queued graph contains a cycle
    pub fn warn_on_cycles(&self) -> bool {
        match self.find_cycle() {
            Some(cycle) => {
                warn!(cycle = %cycle.join(" -> "), "Dependency cycle: these stories will never become ready");
                true
            }
            None => false,
        }
    }
}

/// DFS helper for cycle detection
fn has_cycle_dfs<'a>(
    node: &'a str,
    graph: &HashMap<&'a str, &'a Story>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    cycle_path: &mut Vec<String>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    cycle_path.push(node.to_string());

    if let Some(story) = graph.get(node) {
        for dep_id in &story.depends_on {
            if !visited.contains(dep_id.as_str()) {
                if graph.contains_key(dep_id.as_str())
                    && has_cycle_dfs(dep_id.as_str(), graph, visited, rec_stack, cycle_path)
                {
                    return true;
                }
            } else if rec_stack.contains(dep_id.as_str()) {
                cycle_path.push(dep_id.clone());
                return true;
            }
        }
    }

    rec_stack.remove(node);
    cycle_path.pop();
    false
}
