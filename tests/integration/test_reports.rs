//! Integration tests for the report layer.
//!
//! These tests run the pipeline against a scripted client and then exercise
//! the markdown renderers and the JSON exporter on real run output: lesson
//! documents, run reports for successful and failed runs, and file export.

use std::sync::Arc;

use lilt_client::ScriptedClient;
use lilt_pipeline::{
    CefrLevel, GenerateLessonRequest, Lesson, LessonType, PipelineConfig, PipelineOrchestrator,
    RunRecord,
};
use lilt_report::{JsonExporter, LessonRenderer, RunReportRenderer};
use serde_json::{json, Value};

const ARTICLE: &str = "City gardens change the way a neighborhood eats. Every shared \
    garden gives neighbors fresh vegetables in summer. Volunteers water each garden bed \
    and compost the kitchen waste. Children visit the garden to learn where food comes \
    from. Harvest days turn the garden into a small market.";

/// Words the scripted vocabulary reply teaches, in reply order.
const TAUGHT_WORDS: [&str; 8] = [
    "garden",
    "harvest",
    "compost",
    "vegetables",
    "volunteers",
    "neighbors",
    "summer",
    "market",
];

/// Builds a reply with the requested number of questions.
fn questions_reply(count: usize) -> String {
    let questions: Vec<String> = (0..count)
        .map(|i| format!("What might neighbor number {i} grow in the garden?"))
        .collect();
    json!({ "questions": questions }).to_string()
}

/// Builds a reply teaching the given words with four examples each.
fn vocabulary_reply(words: &[&str]) -> String {
    let items: Vec<Value> = words
        .iter()
        .map(|word| {
            json!({
                "word": word,
                "meaning": format!("what {word} means in a shared garden"),
                "examples": [
                    format!("People in our garden group use the {word} often."),
                    format!("The {word} helps the garden feed more neighbors."),
                    format!("We talked about the {word} at the garden."),
                    format!("Each garden project records the {word} it needs."),
                ],
            })
        })
        .collect();
    json!({ "words": items }).to_string()
}

/// Builds a reading passage that bolds two taught words.
fn reading_reply() -> String {
    let passage =
        "Every **garden** gives the street fresh **vegetables** in late summer. ".repeat(16);
    json!({
        "passage": passage.trim_end(),
        "vocabularyUsed": ["garden", "vegetables"],
    })
    .to_string()
}

/// Builds the lesson title reply.
fn title_reply() -> String {
    json!({ "title": "A Garden for Every Street" }).to_string()
}

/// Scripts one valid reply per planned section of a discussion lesson.
fn discussion_script() -> ScriptedClient {
    ScriptedClient::new()
        .with_completion(questions_reply(3))
        .with_completion(vocabulary_reply(&TAUGHT_WORDS))
        .with_completion(reading_reply())
        .with_completion(questions_reply(4))
        .with_completion(questions_reply(5))
        .with_completion(questions_reply(3))
        .with_completion(title_reply())
}

/// Builds a B1 request for the fixture article.
fn request(lesson_type: LessonType) -> GenerateLessonRequest {
    GenerateLessonRequest::new(ARTICLE, lesson_type, CefrLevel::B1, "English")
}

/// Drives a full scripted discussion run and returns the finished lesson.
async fn generate_lesson() -> Lesson {
    let orchestrator =
        PipelineOrchestrator::new(Arc::new(discussion_script()), PipelineConfig::default());
    orchestrator
        .run(request(LessonType::Discussion))
        .await
        .expect("Failed to generate the fixture lesson")
}

/// Drives a scripted discussion run and returns the full record.
async fn record_discussion_run() -> RunRecord {
    let orchestrator =
        PipelineOrchestrator::new(Arc::new(discussion_script()), PipelineConfig::default());
    orchestrator
        .run_recorded(request(LessonType::Discussion))
        .await
}

/// Drives a pronunciation run whose focus section rejects every attempt.
async fn record_failed_pronunciation_run() -> RunRecord {
    // Both replies practice words the vocabulary section never taught.
    let bad_reply = json!({
        "items": [
            { "word": "thorough", "ipa": "/ˈθʌrə/", "tip": "Relax the final vowel." },
            { "word": "splendid", "ipa": "/ˈsplɛndɪd/", "tip": "Stress the first syllable." },
            { "word": "quaint", "ipa": "/kweɪnt/", "tip": "Glide through the vowel." },
            { "word": "brisk", "ipa": "/brɪsk/", "tip": "Keep the vowel short." },
            { "word": "mellow", "ipa": "/ˈmɛloʊ/", "tip": "Round the final vowel." },
        ]
    })
    .to_string();
    let client = ScriptedClient::new()
        .with_completion(questions_reply(3))
        .with_completion(vocabulary_reply(&TAUGHT_WORDS))
        .with_completion(reading_reply())
        .with_completion(questions_reply(4))
        .with_completion(bad_reply.clone())
        .with_completion(bad_reply);
    let orchestrator = PipelineOrchestrator::new(Arc::new(client), PipelineConfig::default());
    orchestrator
        .run_recorded(request(LessonType::Pronunciation))
        .await
}

// ============================================================================
// Markdown rendering
// ============================================================================

/// Tests that the rendered lesson document carries the title line, the
/// metadata line, and a heading for every generated section.
#[tokio::test]
async fn test_lesson_markdown_includes_every_section() {
    let lesson = generate_lesson().await;
    let markdown = LessonRenderer::new(&lesson).render();

    assert!(
        markdown.starts_with("# A Garden for Every Street"),
        "Document should open with the lesson title, got:\n{markdown}"
    );
    assert!(
        markdown.contains("*B1 discussion lesson in English.*"),
        "Missing the metadata line"
    );

    for heading in [
        "## Warm-up",
        "## Vocabulary",
        "## Reading",
        "## Comprehension",
        "## Discussion",
        "## Wrap-up",
    ] {
        assert!(markdown.contains(heading), "Missing heading: {heading}");
    }

    // The passage keeps its bold markers and the taught-word note follows it.
    assert!(markdown.contains("Every **garden** gives the street fresh **vegetables**"));
    assert!(markdown.contains("*Taught words used: garden, vegetables.*"));

    assert!(
        !markdown.contains("## Answer Key"),
        "A discussion lesson has no exercises to key"
    );
    assert!(markdown.contains("*Generated by Lilt at "));
}

/// Tests that the run report for a clean run summarizes sections, attempts,
/// and token usage.
#[tokio::test]
async fn test_run_report_covers_attempts_and_tokens() {
    let record = record_discussion_run().await;
    let report = RunReportRenderer::new(&record).render();

    assert!(
        report.starts_with("# Lilt Run Report: A Garden for Every Street"),
        "Report should open with the lesson title, got:\n{report}"
    );
    assert!(report.contains("| Outcome | Lesson generated |"));
    assert!(report.contains("| Sections driven | 7 |"));
    assert!(report.contains("| Sections valid | 7 |"));
    assert!(report.contains("| Attempts spent | 7 |"));
    assert!(report.contains("| Generation calls | 7 |"));
    assert!(report.contains("| Failed attempts | 0 |"));

    // Every section lands in the per-section table with one valid attempt.
    for name in [
        "warmup",
        "vocabulary",
        "reading",
        "comprehension",
        "discussion",
        "wrapup",
        "title",
    ] {
        assert!(
            report.contains(&format!("| {name} | valid | 1 | valid |")),
            "Missing section row for {name} in:\n{report}"
        );
    }

    assert!(report.contains("*No failed attempts.*"));
    assert!(report.contains("*No errors recorded.*"));
}

/// Tests that the run report for a failed run names the failing section,
/// the failure kind, and the attempt ceiling it exhausted.
#[tokio::test]
async fn test_run_report_for_a_failed_run_names_the_failure() {
    let record = record_failed_pronunciation_run().await;
    let report = RunReportRenderer::new(&record).render();

    assert!(
        report.starts_with("# Lilt Run Report"),
        "Unexpected report opening:\n{report}"
    );
    assert!(report.contains("| Outcome | Failed |"));
    assert!(report.contains(
        "**Run error**: section `pronunciation` gave up (validation) after 2 attempt(s)."
    ));
    assert!(
        report.contains("| pronunciation | failed_exhausted | 2 |"),
        "Missing the failed section row in:\n{report}"
    );
    assert!(
        !report.contains("*No errors recorded.*"),
        "A failed run must not render the empty-errors placeholder"
    );
}

// ============================================================================
// JSON export
// ============================================================================

/// Tests that the exported lesson JSON keeps its wire field names and
/// survives a parse round trip.
#[tokio::test]
async fn test_lesson_json_round_trips() {
    let lesson = generate_lesson().await;
    let pretty = JsonExporter::new(&lesson)
        .pretty()
        .expect("Failed to export the lesson");
    let value: Value = serde_json::from_str(&pretty).expect("Exported lesson is not valid JSON");

    assert_eq!(value["title"], "A Garden for Every Street");
    assert_eq!(
        value["sections"]["vocabulary"]["words"]
            .as_array()
            .map(Vec::len),
        Some(8)
    );
    assert_eq!(
        value["sections"]["reading"]["vocabularyUsed"],
        json!(["garden", "vegetables"])
    );
    assert_eq!(value["metadata"]["cefrLevel"], "B1");
    assert_eq!(value["metadata"]["lessonType"], "discussion");
    assert_eq!(value["metadata"]["tokenReport"]["totalCalls"], 7);
    assert!(
        value["sections"]["dialogue"].is_null(),
        "Absent focus sections are omitted from the export"
    );
}

/// Tests that the exporter writes a parseable pretty-printed file.
#[tokio::test]
async fn test_json_export_writes_a_file() {
    let lesson = generate_lesson().await;
    let path = std::env::temp_dir().join(format!("lilt-lesson-{}.json", std::process::id()));

    JsonExporter::new(&lesson)
        .write_to_file(&path, true)
        .expect("Failed to write the lesson JSON");
    let written = std::fs::read_to_string(&path).expect("Failed to read the exported file");
    std::fs::remove_file(&path).ok();

    let value: Value = serde_json::from_str(&written).expect("Exported file is not valid JSON");
    assert_eq!(value["title"], "A Garden for Every Street");
    assert!(
        written.lines().count() > 1,
        "Pretty output should span multiple lines"
    );
}
