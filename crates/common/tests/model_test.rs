use sitesearch_common::model::*;
use uuid::Uuid;

#[test]
fn envelope_preserves_task_id_through_json_round_trip() {
    let task_id = Uuid::new_v4();
    let envelope = Envelope::new(task_id, CrawlTaskItem {
        url: "https://a.example/".to_string(),
        site_id: "s1".to_string(),
        task_id,
        depth: 0,
        timestamp: 0,
    });

    let json = serde_json::to_string(&envelope).unwrap();
    let back: Envelope<CrawlTaskItem> = serde_json::from_str(&json).unwrap();

    assert_eq!(back.task_id, task_id);
    assert_eq!(back.payload.task_id, task_id);
}

#[test]
fn index_operation_display_matches_spec_vocabulary() {
    assert_eq!(IndexOperation::New.to_string(), "new");
    assert_eq!(IndexOperation::NewSite.to_string(), "new_site");
    assert_eq!(IndexOperation::Edit.to_string(), "edit");
    assert_eq!(IndexOperation::Skip.to_string(), "skip");
    assert_eq!(IndexOperation::Delete.to_string(), "delete");
}

#[test]
fn crawler_content_tag_round_trips() {
    let text = CrawlerContent::Text("hello".to_string());
    let json = serde_json::to_value(&text).unwrap();
    assert_eq!(json["kind"], "text");

    let binary = CrawlerContent::Base64Binary("aGVsbG8=".to_string());
    let json = serde_json::to_value(&binary).unwrap();
    assert_eq!(json["kind"], "base64_binary");
}

#[test]
fn schedule_variant_serializes_tagged() {
    let once = ScheduleVariant::Once {
        one_time_date: chrono::Utc::now(),
    };
    let json = serde_json::to_value(&once).unwrap();
    assert_eq!(json["variant"], "once");

    let interval = ScheduleVariant::Interval {
        interval_seconds: 3600,
    };
    let json = serde_json::to_value(&interval).unwrap();
    assert_eq!(json["variant"], "interval");
    assert_eq!(json["interval_seconds"], 3600);
}
