//! Broker key namespacing, per §6 "Persisted state layout":
//! `sitesearch:queue:*`, `sitesearch:processing:*`, `sitesearch:completed:*`,
//! `sitesearch:failed:*`, `sitesearch:last_activity:*`,
//! `sitesearch:processing_times:*`, `sitesearch:task:{id}:queue`,
//! `crawler:crawled_urls:{queue_key}`.

pub fn queue(name: &str) -> String {
    format!("sitesearch:queue:{name}")
}

pub fn processing(name: &str) -> String {
    format!("sitesearch:processing:{name}")
}

pub fn completed(name: &str) -> String {
    format!("sitesearch:completed:{name}")
}

pub fn failed(name: &str) -> String {
    format!("sitesearch:failed:{name}")
}

pub fn stats(name: &str) -> String {
    format!("sitesearch:stats:{name}")
}

pub fn task_meta(task_id: &str) -> String {
    format!("sitesearch:task:meta:{task_id}")
}

pub fn last_activity(name: &str) -> String {
    format!("sitesearch:last_activity:{name}")
}

pub fn processing_times(name: &str) -> String {
    format!("sitesearch:processing_times:{name}")
}

/// A per-task input queue, e.g. for a crawl task's BFS frontier.
pub fn task_input_queue(task_id: &str) -> String {
    format!("sitesearch:task:{task_id}:queue")
}

/// The crawled-URL dedup set for a given input queue key (§4.5 step 2).
pub fn crawled_urls(queue_key: &str) -> String {
    format!("crawler:crawled_urls:{queue_key}")
}

/// The indexer's per-site chunk-text document store (§4.3), a Redis hash
/// keyed by `chunk_id` within `sitesearch:{site_id}:docs`.
pub fn doc_store(site_id: &str) -> String {
    format!("sitesearch:{site_id}:docs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespacing_matches_spec() {
        assert_eq!(queue("crawler"), "sitesearch:queue:crawler");
        assert_eq!(processing("crawler"), "sitesearch:processing:crawler");
        assert_eq!(
            task_input_queue("abc"),
            "sitesearch:task:abc:queue"
        );
        assert_eq!(
            crawled_urls("sitesearch:task:abc:queue"),
            "crawler:crawled_urls:sitesearch:task:abc:queue"
        );
    }
}
