//! End-to-end integration tests for the lesson generation pipeline.
//!
//! These tests drive the orchestrator through its public API with a scripted
//! generation client: complete lessons of several types, bounded retry with
//! scope narrowing, partial acceptance after truncation, abort paths, and
//! the progress stream. No network access is required.

use std::sync::Arc;

use lilt_client::{ScriptedClient, TransportErrorKind};
use lilt_pipeline::{
    CefrLevel, FailureKind, GenerateLessonRequest, LessonType, PipelineConfig,
    PipelineOrchestrator, PipelinePhase, SectionName, SectionStatus, SourceMetadata,
};
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

/// Builds a reply teaching the given words with examples each.
fn vocabulary_reply(words: &[&str], examples_per_word: usize) -> String {
    let items: Vec<Value> = words
        .iter()
        .map(|word| {
            let examples: Vec<String> = [
                format!("People in our garden group use the {word} often."),
                format!("The {word} helps the garden feed more neighbors."),
                format!("We talked about the {word} at the garden."),
                format!("Each garden project records the {word} it needs."),
            ]
            .into_iter()
            .take(examples_per_word)
            .collect();
            json!({
                "word": word,
                "meaning": format!("what {word} means in a shared garden"),
                "examples": examples,
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

/// Builds a grammar reply sized to the given scope.
fn grammar_reply(examples: usize, exercises: usize) -> String {
    let example_list: Vec<String> = (0..examples)
        .map(|i| format!("The garden opens early on day {i} of the week."))
        .collect();
    let exercise_list: Vec<Value> = (0..exercises)
        .map(|i| {
            json!({
                "prompt": format!("Complete sentence {i}: the garden ___ at noon."),
                "answer": "opens",
            })
        })
        .collect();
    json!({
        "topic": "Present simple for routines",
        "form": "Subject plus the base verb, adding -s in the third person.",
        "usage": "Use the present simple for routines and facts that repeat through the growing season.",
        "examples": example_list,
        "exercises": exercise_list,
    })
    .to_string()
}

/// Builds a ten-line dialogue with a two-blank gap-fill variant.
fn dialogue_reply() -> String {
    let turns = [
        ("Anna", "Where can we buy fresh food around here?"),
        ("Ben", "The garden market opens at nine this morning."),
        ("Anna", "Do the neighbors sell their own vegetables there?"),
        ("Ben", "Yes, the harvest comes straight from the garden."),
        ("Anna", "How much do the tomatoes usually cost?"),
        ("Ben", "They are cheap when the summer harvest is big."),
        ("Anna", "Can we walk there from the hotel?"),
        ("Ben", "It is two streets past the little bridge."),
        ("Anna", "Let us go before the market gets crowded."),
        ("Ben", "Good idea, I will bring a shopping bag."),
    ];
    let lines: Vec<Value> = turns
        .iter()
        .map(|(speaker, text)| json!({ "speaker": speaker, "text": text }))
        .collect();
    json!({
        "lines": lines,
        "gapFill": {
            "lines": [
                { "speaker": "Anna", "text": "Where can we buy fresh ___ around here?" },
                { "speaker": "Ben", "text": "The ___ market opens at nine this morning." },
            ],
            "answerKey": ["food", "garden"],
        },
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
        .with_completion(vocabulary_reply(&TAUGHT_WORDS, 4))
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

// ============================================================================
// Lesson generation
// ============================================================================

/// Tests that a scripted discussion run produces a complete lesson with
/// every planned section filled in.
#[tokio::test]
async fn test_discussion_lesson_generates_all_sections() {
    let orchestrator =
        PipelineOrchestrator::new(Arc::new(discussion_script()), PipelineConfig::default());

    let record = orchestrator
        .run_recorded(request(LessonType::Discussion))
        .await;
    assert!(record.error.is_none(), "Run failed: {:?}", record.error);
    assert_eq!(record.sections.len(), 7, "Expected all seven planned sections");
    assert!(
        record
            .sections
            .iter()
            .all(|section| section.status == SectionStatus::Valid),
        "Every section should reach the valid status"
    );

    let lesson = record.finish().expect("Failed to finish a successful run");
    assert_eq!(lesson.title, "A Garden for Every Street");
    assert_eq!(lesson.sections.warmup.questions.len(), 3);
    assert_eq!(lesson.sections.vocabulary.words.len(), 8);
    assert_eq!(lesson.sections.comprehension.questions.len(), 4);
    assert_eq!(
        lesson
            .sections
            .discussion
            .as_ref()
            .map(|discussion| discussion.questions.len()),
        Some(5),
        "A discussion lesson carries five discussion questions"
    );
    assert!(
        lesson.sections.grammar.is_none(),
        "No grammar section in a discussion lesson"
    );
    assert!(
        lesson.sections.dialogue.is_none(),
        "No dialogue section in a discussion lesson"
    );
    assert_eq!(lesson.sections.wrapup.questions.len(), 3);

    assert_eq!(lesson.metadata.lesson_type, LessonType::Discussion);
    assert_eq!(lesson.metadata.cefr_level, CefrLevel::B1);
    assert_eq!(lesson.metadata.target_language, "English");
}

/// Tests that a clean run accounts exactly one call and one attempt per
/// planned section.
#[tokio::test]
async fn test_usage_accounting_for_a_clean_run() {
    let orchestrator =
        PipelineOrchestrator::new(Arc::new(discussion_script()), PipelineConfig::default());

    let lesson = orchestrator
        .run(request(LessonType::Discussion))
        .await
        .expect("Run failed");

    let report = &lesson.metadata.token_report;
    assert_eq!(report.total_calls, 7);
    assert_eq!(report.total_attempts, 7);
    assert_eq!(report.errors.total(), 0, "A clean run records no failed attempts");
    assert!(report.total_tokens > 0, "Scripted replies still consume tokens");
    assert_eq!(
        report.total_tokens,
        report.prompt_tokens + report.completion_tokens
    );
    assert_eq!(report.sections.len(), 7);

    let vocabulary = &report.sections[&SectionName::Vocabulary];
    assert_eq!(
        vocabulary.calls, 1,
        "The default config batches vocabulary into one call"
    );
    assert_eq!(vocabulary.attempts, 1);
    assert_eq!(vocabulary.truncations, 0);
}

/// Tests that a travel lesson drives the dialogue section and keeps its
/// gap-fill variant through assembly.
#[tokio::test]
async fn test_travel_lesson_includes_dialogue_and_gap_fill() {
    let client = ScriptedClient::new()
        .with_completion(questions_reply(3))
        .with_completion(vocabulary_reply(&TAUGHT_WORDS, 4))
        .with_completion(reading_reply())
        .with_completion(questions_reply(4))
        .with_completion(dialogue_reply())
        .with_completion(questions_reply(3))
        .with_completion(title_reply());
    let orchestrator = PipelineOrchestrator::new(Arc::new(client), PipelineConfig::default());

    let lesson = orchestrator
        .run(request(LessonType::Travel))
        .await
        .expect("Travel run failed");

    let dialogue = lesson
        .sections
        .dialogue
        .as_ref()
        .expect("Dialogue section missing from a travel lesson");
    assert_eq!(dialogue.lines.len(), 10);
    assert!(
        dialogue
            .lines
            .windows(2)
            .all(|pair| pair[0].speaker != pair[1].speaker),
        "Dialogue speakers should alternate"
    );

    let gap_fill = dialogue
        .gap_fill
        .as_ref()
        .expect("Gap-fill variant missing from the dialogue");
    assert_eq!(gap_fill.answer_key.len(), 2);
    assert_eq!(gap_fill.answer_key[0], "food");
    assert!(lesson.sections.discussion.is_none());
}

// ============================================================================
// Retry and partial acceptance
// ============================================================================

/// Tests that a truncated grammar attempt retries once with a smaller token
/// cap and a narrowed scope, then completes the lesson.
#[tokio::test]
async fn test_grammar_truncation_retries_with_narrowed_scope() {
    let client = Arc::new(
        ScriptedClient::new()
            .with_completion(questions_reply(3))
            .with_completion(vocabulary_reply(&TAUGHT_WORDS, 4))
            .with_completion(reading_reply())
            .with_completion(questions_reply(4))
            .with_truncation(Some(r#"{"topic": "Present simple", "form": "Subject plus"#))
            .with_completion(grammar_reply(3, 3))
            .with_completion(questions_reply(3))
            .with_completion(title_reply()),
    );
    let orchestrator = PipelineOrchestrator::new(client.clone(), PipelineConfig::default());

    let record = orchestrator.run_recorded(request(LessonType::Grammar)).await;
    let lesson = record
        .finish()
        .expect("Grammar run should recover after one retry");

    let grammar = lesson
        .sections
        .grammar
        .as_ref()
        .expect("Grammar section missing from a grammar lesson");
    assert_eq!(grammar.exercises.len(), 3, "The retry narrows the exercise count");
    assert!(grammar.examples.len() >= 3);

    let calls = client.recorded_calls().await;
    assert_eq!(calls.len(), 8, "One call per section plus one grammar retry");
    assert_eq!(calls[4].token_cap, 800, "First grammar attempt uses the full cap");
    assert_eq!(calls[5].token_cap, 600, "The retry runs under a reduced cap");

    let report = &lesson.metadata.token_report;
    assert_eq!(report.sections[&SectionName::Grammar].attempts, 2);
    assert_eq!(report.sections[&SectionName::Grammar].truncations, 1);
    assert_eq!(report.errors.token_limit, 1);
}

/// Tests that a truncated vocabulary reply with enough complete words is
/// accepted without spending another attempt.
#[tokio::test]
async fn test_truncated_vocabulary_accepts_a_sufficient_partial() {
    // Eight words were requested; the truncated reply carries four finished
    // words with two usable examples each, which meets the partial policy.
    let partial = vocabulary_reply(&["garden", "vegetables", "harvest", "compost"], 2);
    let client = ScriptedClient::new()
        .with_completion(questions_reply(3))
        .with_truncation(Some(&partial))
        .with_completion(reading_reply())
        .with_completion(questions_reply(4))
        .with_completion(questions_reply(5))
        .with_completion(questions_reply(3))
        .with_completion(title_reply());
    let orchestrator = PipelineOrchestrator::new(Arc::new(client), PipelineConfig::default());

    let record = orchestrator
        .run_recorded(request(LessonType::Discussion))
        .await;
    let vocabulary = &record.sections[1];
    assert_eq!(vocabulary.name, SectionName::Vocabulary);
    assert_eq!(vocabulary.status, SectionStatus::Valid);
    assert_eq!(
        vocabulary.attempts.len(),
        1,
        "A sufficient partial spends no retry"
    );

    let lesson = record
        .finish()
        .expect("The run should absorb the partial vocabulary");
    assert_eq!(
        lesson.sections.vocabulary.words.len(),
        4,
        "Half the requested words survive the truncation"
    );

    let report = &lesson.metadata.token_report;
    assert_eq!(report.sections[&SectionName::Vocabulary].truncations, 1);
    assert_eq!(
        report.errors.total(),
        0,
        "An accepted partial is not a failed attempt"
    );
}

// ============================================================================
// Failure paths
// ============================================================================

/// Tests that a transport failure aborts the section and the run without
/// spending further attempts.
#[tokio::test]
async fn test_transport_error_aborts_without_retry() {
    let client = Arc::new(
        ScriptedClient::new()
            .with_completion(questions_reply(3))
            .with_transport_error(TransportErrorKind::RateLimit, "quota exhausted"),
    );
    let orchestrator = PipelineOrchestrator::new(client.clone(), PipelineConfig::default());

    let record = orchestrator
        .run_recorded(request(LessonType::Discussion))
        .await;
    assert!(record.lesson.is_none(), "A transport failure must not yield a lesson");

    let error = record.error.expect("Expected a run error");
    let failure = error
        .failure()
        .cloned()
        .expect("Expected a section failure");
    assert_eq!(failure.section_name, SectionName::Vocabulary);
    assert_eq!(failure.kind, FailureKind::Transport);
    assert_eq!(failure.attempts_exhausted, 1, "Transport failures do not retry");

    // Only warmup and the aborted vocabulary section were driven.
    assert_eq!(record.sections.len(), 2);
    assert_eq!(record.sections[0].status, SectionStatus::Valid);
    assert_eq!(record.sections[1].status, SectionStatus::FailedExhausted);
    assert_eq!(record.token_report.total_calls, 2);
    assert_eq!(record.token_report.errors.transport, 1);
    assert_eq!(client.remaining().await, 0, "No scripted outcomes should remain");
}

/// Tests that a section rejecting every attempt fails the run with a
/// validation failure naming the exhausted ceiling.
#[tokio::test]
async fn test_invalid_pronunciation_exhausts_attempts_and_fails_the_run() {
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
    let orchestrator = PipelineOrchestrator::new(
        Arc::new(
            ScriptedClient::new()
                .with_completion(questions_reply(3))
                .with_completion(vocabulary_reply(&TAUGHT_WORDS, 4))
                .with_completion(reading_reply())
                .with_completion(questions_reply(4))
                .with_completion(bad_reply.clone())
                .with_completion(bad_reply),
        ),
        PipelineConfig::default(),
    );
    let mut events = orchestrator.subscribe();

    let record = orchestrator
        .run_recorded(request(LessonType::Pronunciation))
        .await;
    assert!(record.lesson.is_none());

    let error = record.error.expect("Expected a run error");
    let failure = error
        .failure()
        .cloned()
        .expect("Expected a section failure");
    assert_eq!(failure.section_name, SectionName::Pronunciation);
    assert_eq!(failure.kind, FailureKind::Validation);
    assert_eq!(failure.attempts_exhausted, 2, "Pronunciation allows two attempts");
    assert!(
        failure.reasons.iter().any(|r| r.starts_with("attempt 1:")),
        "Reasons should cover the first attempt: {:?}",
        failure.reasons
    );
    assert!(
        failure.reasons.iter().any(|r| r.starts_with("attempt 2:")),
        "Reasons should cover the second attempt: {:?}",
        failure.reasons
    );

    // The four earlier sections stay valid in the record.
    assert_eq!(record.sections.len(), 5);
    assert!(
        record.sections[..4]
            .iter()
            .all(|section| section.status == SectionStatus::Valid)
    );
    assert_eq!(record.sections[4].status, SectionStatus::FailedExhausted);
    assert_eq!(record.token_report.errors.validation, 2);

    // The stream ends with a failure event pinned at the failing section.
    let mut last = None;
    while let Ok(event) = events.try_recv() {
        last = Some(event);
    }
    let last = last.expect("Expected progress events");
    assert_eq!(last.phase, PipelinePhase::Failed);
    assert_eq!(last.section, Some(SectionName::Pronunciation));
    assert!(
        last.progress_percent < 100,
        "A failed run never reaches 100 percent"
    );
}

/// Tests that a failed title generation falls back to the title supplied
/// with the source metadata.
#[tokio::test]
async fn test_title_failure_falls_back_to_the_supplied_source_title() {
    let overlong = json!({
        "title": "A very long lesson title that runs far past the usual budget"
    })
    .to_string();
    let client = ScriptedClient::new()
        .with_completion(questions_reply(3))
        .with_completion(vocabulary_reply(&TAUGHT_WORDS, 4))
        .with_completion(reading_reply())
        .with_completion(questions_reply(4))
        .with_completion(questions_reply(5))
        .with_completion(questions_reply(3))
        .with_completion(overlong.clone())
        .with_completion(overlong);
    let orchestrator = PipelineOrchestrator::new(Arc::new(client), PipelineConfig::default());

    let request = request(LessonType::Discussion).with_metadata(SourceMetadata {
        title: Some("The Street Garden Project".to_string()),
        domain: Some("example.org".to_string()),
        source_url: None,
        banner_image: None,
    });
    let record = orchestrator.run_recorded(request).await;

    assert!(
        record.used_supplied_title(),
        "The supplied title should stand in for the failed generation"
    );
    let title_section = record
        .sections
        .iter()
        .find(|section| section.name == SectionName::Title)
        .expect("Title section missing from the record");
    assert_eq!(title_section.status, SectionStatus::FailedExhausted);

    let lesson = record
        .finish()
        .expect("The fallback should still complete the run");
    assert_eq!(lesson.title, "The Street Garden Project");
    assert_eq!(
        lesson
            .metadata
            .source_metadata
            .as_ref()
            .and_then(|metadata| metadata.domain.as_deref()),
        Some("example.org")
    );
}

// ============================================================================
// Progress stream
// ============================================================================

/// Tests that progress only moves forward, covers every planned section in
/// order, and ends at 100 percent.
#[tokio::test]
async fn test_progress_stream_is_monotonic_and_completes() {
    let orchestrator =
        PipelineOrchestrator::new(Arc::new(discussion_script()), PipelineConfig::default());
    let mut events = orchestrator.subscribe();

    orchestrator
        .run(request(LessonType::Discussion))
        .await
        .expect("Run failed");

    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    assert!(!collected.is_empty(), "Expected buffered progress events");

    let percents: Vec<u8> = collected
        .iter()
        .map(|event| event.progress_percent)
        .collect();
    assert!(
        percents.windows(2).all(|pair| pair[0] <= pair[1]),
        "Progress went backwards: {percents:?}"
    );

    // One generating event per planned section, in plan order.
    let generating: Vec<SectionName> = collected
        .iter()
        .filter(|event| event.phase == PipelinePhase::Generating)
        .filter_map(|event| event.section)
        .collect();
    assert_eq!(
        generating,
        vec![
            SectionName::Warmup,
            SectionName::Vocabulary,
            SectionName::Reading,
            SectionName::Comprehension,
            SectionName::Discussion,
            SectionName::Wrapup,
            SectionName::Title,
        ],
        "Sections should be generated in plan order"
    );

    let last = collected.last().expect("Expected a terminal event");
    assert_eq!(last.progress_percent, 100);
    assert_eq!(last.phase, PipelinePhase::Completed);
}
