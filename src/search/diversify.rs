//! Page diversifier / 结果多样化
//!
//! Round-robin across content groups so a page is not dominated by one
//! show. Groups are visited in first-appearance order and items inside a
//! group keep their stable identity order, so the pass is deterministic.
//! A fairness heuristic, not a relevance ranking.
//! 按内容轮转选取，分组按首次出现顺序，组内保持稳定ID序

use std::collections::VecDeque;

use crate::models::CardResult;

/// Diversify an over-fetched window down to at most `page_size` items.
/// A window that already fits the page, or that holds a single content
/// group, passes through unchanged. / 单组或不超页的窗口原样返回
pub fn diversify(results: Vec<CardResult>, page_size: usize) -> Vec<CardResult> {
    if results.len() <= page_size {
        return results;
    }

    let mut groups: Vec<(String, VecDeque<CardResult>)> = Vec::new();
    for result in results {
        match groups.iter_mut().find(|(id, _)| *id == result.content_id) {
            Some((_, queue)) => queue.push_back(result),
            None => {
                let mut queue = VecDeque::new();
                let id = result.content_id.clone();
                queue.push_back(result);
                groups.push((id, queue));
            }
        }
    }

    if groups.len() == 1 {
        if let Some((_, queue)) = groups.pop() {
            return queue.into_iter().collect();
        }
        return Vec::new();
    }

    let mut out = Vec::with_capacity(page_size);
    'rounds: loop {
        let mut emitted = false;
        for (_, queue) in groups.iter_mut() {
            if let Some(item) = queue.pop_front() {
                out.push(item);
                emitted = true;
                if out.len() >= page_size {
                    break 'rounds;
                }
            }
        }
        if !emitted {
            break;
        }
    }
    out
}
