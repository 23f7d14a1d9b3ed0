//! Space and page discovery: expand the configured roots into the full
//! work list.
//!
//! Both traversals use an explicit worklist of `(node, depth)` pairs
//! rather than call recursion, so the depth bound is the one and only
//! termination guard: a corpus with back-reference cycles still
//! terminates, at the cost of possibly re-listing a node reachable twice
//! within the bound. A lookup failure for one node abandons that subtree
//! with a warning; siblings already enumerated keep going.

use crate::confluence::ContentSource;
use crate::models::{PageRef, Space};

/// Expand all nested spaces under `root_key`, excluding the root itself.
/// Parents always precede their children in the returned list.
pub async fn expand_spaces(
    source: &dyn ContentSource,
    root_key: &str,
    max_depth: u32,
) -> Vec<Space> {
    let mut found = Vec::new();
    let mut work: Vec<(String, u32)> = vec![(root_key.to_string(), 0)];

    while let Some((parent_key, depth)) = work.pop() {
        if depth >= max_depth {
            continue;
        }

        let children = match source.list_spaces(&parent_key).await {
            Ok(children) => children,
            Err(e) => {
                eprintln!("Warning: could not list child spaces of {}: {}", parent_key, e);
                continue;
            }
        };

        let mut queued = Vec::with_capacity(children.len());
        for child in children {
            found.push(Space {
                key: child.key.clone(),
                name: child.name,
                space_type: child.space_type,
                parent_key: Some(parent_key.clone()),
                depth: depth + 1,
                url: child.url,
                description: child.description,
                status: child.status,
            });
            queued.push((child.key, depth + 1));
        }
        // Reverse so the stack pops siblings in listing order.
        for item in queued.into_iter().rev() {
            work.push(item);
        }
    }

    found
}

/// Expand a space into its full page forest: top-level pages first, then
/// nested children down to `max_depth` levels below the top, flattened
/// into one list with parents before their children.
pub async fn expand_pages(
    source: &dyn ContentSource,
    space_key: &str,
    max_depth: u32,
) -> Vec<PageRef> {
    let top_level = match source.list_top_level_pages(space_key).await {
        Ok(pages) => pages,
        Err(e) => {
            eprintln!(
                "Warning: could not list top-level pages of {}: {}",
                space_key, e
            );
            return Vec::new();
        }
    };

    let mut all = top_level.clone();
    // (parent page id, level of its children)
    let mut work: Vec<(String, u32)> = top_level
        .iter()
        .rev()
        .map(|p| (p.id.clone(), 1))
        .collect();

    while let Some((page_id, level)) = work.pop() {
        if level > max_depth {
            continue;
        }

        let children = match source.list_child_pages(&page_id).await {
            Ok(children) => children,
            Err(e) => {
                eprintln!("Warning: could not list child pages of {}: {}", page_id, e);
                continue;
            }
        };

        let mut queued = Vec::with_capacity(children.len());
        for child in children {
            queued.push((child.id.clone(), level + 1));
            all.push(child);
        }
        for item in queued.into_iter().rev() {
            work.push(item);
        }
    }

    all
}
