use super::grounding::{AnswerPolicy, AnswerPolicyConfig, DEFAULT_MAX_DISTANCE, REFUSAL_TEXT};
use super::output::snippet;
use super::pipeline::answer_question;
use super::retrieval::Retriever;
use crate::commands::index::build::{IndexConfig, build_index};
use crate::commands::index::noise::{NoiseFilter, NoiseFilterConfig};
use crate::commands::ingest::chunker::{Chunker, ChunkerConfig};
use crate::error::{AskError, CollaboratorError, GenerationError, RetrievalError};
use crate::model::{ChunkMetadata, Query, RetrievalResult, SourceRef};
use crate::semantic::{Embedder, LocalHashEmbedder, OPENAI_BACKEND, SemanticModelConfig};
use crate::store::{MemoryVectorStore, SqliteVectorStore, VectorStore};
use crate::test_support::{
    CAMPUS_GUIDE_PAGE_TWO, CAMPUS_PARKING, FixedGenerator, HANDBOOK_OBJECTIVE, HANDBOOK_PAGE_THREE,
    HANDBOOK_STUDY_PLAN, chunk, instant_retry, page,
};

const OBJECTIVE_QUESTION: &str = "What is the objective of this handbook?";
const WEATHER_QUESTION: &str = "What is the weather in Helsinki today?";
const PARKING_QUESTION: &str = "Who issues parking permits for the campus garage?";

fn index_into(store: &mut dyn VectorStore, embedder: &dyn Embedder) {
    let chunks = vec![
        chunk("handbook", 3, 0, HANDBOOK_OBJECTIVE),
        chunk("handbook", 4, 0, HANDBOOK_STUDY_PLAN),
        chunk("campus-guide", 2, 0, CAMPUS_PARKING),
    ];
    let filter = NoiseFilter::new(NoiseFilterConfig::default()).expect("valid noise filter");
    let report = build_index(&chunks, embedder, &filter, store, &IndexConfig::default())
        .expect("index builds");
    assert_eq!(report.meta.chunk_count, 3);
}

fn indexed_store() -> MemoryVectorStore {
    let mut store = MemoryVectorStore::default();
    index_into(&mut store, &LocalHashEmbedder::default());
    store
}

fn query(question: &str, doc_id: Option<&str>, top_k: usize) -> Query {
    Query {
        question: question.to_string(),
        doc_id: doc_id.map(str::to_string),
        top_k,
    }
}

fn policy() -> AnswerPolicy {
    AnswerPolicy::new(AnswerPolicyConfig {
        retry: instant_retry(),
        ..AnswerPolicyConfig::default()
    })
}

/// Gates used for embedders whose distances are calibrated.
fn distance_policy() -> AnswerPolicy {
    let model = SemanticModelConfig {
        model_id: "text-embedding-3-small".to_string(),
        dimensions: 1536,
        backend: OPENAI_BACKEND.to_string(),
    };
    AnswerPolicy::new(AnswerPolicyConfig {
        retry: instant_retry(),
        ..AnswerPolicyConfig::for_model(&model)
    })
}

fn retrieve(store: &dyn VectorStore, query: &Query) -> Result<Vec<RetrievalResult>, RetrievalError> {
    let embedder = LocalHashEmbedder::default();
    Retriever::new(store, &embedder)
        .with_retry(instant_retry())
        .query(query)
}

fn result(doc_id: &str, page: u32, distance: f64, rank: usize) -> RetrievalResult {
    RetrievalResult {
        chunk: ChunkMetadata {
            chunk_id: format!("{doc_id}:p{page:04}:c{rank:06}"),
            doc_id: doc_id.to_string(),
            title: "Student Guidance Handbook".to_string(),
            page,
            char_start: rank,
            char_end: rank + 10,
            text: format!("The objective of this handbook is explained on page {page}."),
        },
        distance,
        rank,
    }
}

#[test]
fn handbook_objective_is_answered_from_page_three() {
    let store = indexed_store();
    let results = retrieve(&store, &query(OBJECTIVE_QUESTION, None, 5)).expect("retrieval");
    assert_eq!(results[0].chunk.doc_id, "handbook");
    assert_eq!(results[0].chunk.page, 3);

    let generator = FixedGenerator::replying(
        "The handbook exists to support guidance staff in their work (handbook title, page 3).",
    );
    let answer = policy()
        .answer(OBJECTIVE_QUESTION, &results, &generator)
        .expect("answer");

    assert!(!answer.refused);
    assert!(answer.text.contains("support"));
    assert_eq!(
        answer.cited_sources,
        vec![SourceRef {
            doc_id: "handbook".to_string(),
            page: 3
        }]
    );

    let prompt = generator.last_prompt().expect("generator was called");
    assert!(prompt.contains(HANDBOOK_OBJECTIVE));
    assert!(prompt.contains("page 3"));
    assert!(!prompt.contains(CAMPUS_PARKING), "weak matches stay out of the prompt");
}

#[test]
fn unrelated_question_is_refused_without_generation() {
    let store = indexed_store();
    let results = retrieve(&store, &query(WEATHER_QUESTION, None, 5)).expect("retrieval");
    assert!(!results.is_empty());

    let generator = FixedGenerator::replying("It is sunny and 21 degrees in Helsinki.");
    let answer = policy()
        .answer(WEATHER_QUESTION, &results, &generator)
        .expect("refusal is not an error");

    assert!(answer.refused);
    assert_eq!(answer.text, REFUSAL_TEXT);
    assert!(answer.cited_sources.is_empty());
    assert_eq!(generator.calls(), 0);
}

#[test]
fn generator_refusal_is_reported_as_refusal() {
    let results = vec![result("handbook", 3, 0.4, 1)];
    let generator = FixedGenerator::replying("the answer was NOT found in the documents");
    let answer = policy()
        .answer(OBJECTIVE_QUESTION, &results, &generator)
        .expect("answer");
    assert!(answer.refused);
    assert_eq!(answer.text, REFUSAL_TEXT);
    assert!(answer.cited_sources.is_empty());
}

#[test]
fn without_gates_the_generator_decides() {
    let store = indexed_store();
    let results = retrieve(&store, &query(WEATHER_QUESTION, None, 5)).expect("retrieval");
    let generator = FixedGenerator::replying(REFUSAL_TEXT);
    let policy = AnswerPolicy::new(AnswerPolicyConfig {
        max_distance: None,
        min_term_coverage: None,
        retry: instant_retry(),
        ..AnswerPolicyConfig::default()
    });

    let answer = policy.answer(WEATHER_QUESTION, &results, &generator).expect("answer");
    assert_eq!(generator.calls(), 1);
    assert!(answer.refused);
}

#[test]
fn doc_filter_excludes_better_matches_elsewhere() {
    let store = indexed_store();
    let global = retrieve(&store, &query(PARKING_QUESTION, None, 5)).expect("global");
    assert_eq!(global[0].chunk.doc_id, "campus-guide");

    let scoped = retrieve(&store, &query(PARKING_QUESTION, Some("handbook"), 5)).expect("scoped");
    assert_eq!(scoped.len(), 2);
    assert!(scoped.iter().all(|result| result.chunk.doc_id == "handbook"));
    assert_eq!(scoped[0].rank, 1);
}

#[test]
fn chunk_text_as_question_ranks_that_chunk_first() {
    let store = indexed_store();
    let results = retrieve(&store, &query(HANDBOOK_STUDY_PLAN, None, 3)).expect("retrieval");
    assert_eq!(results[0].chunk.chunk_id, "handbook:p0004:c000000");
    assert!(results[0].distance < 1e-6);
}

#[test]
fn ranks_follow_ascending_distance_within_top_k() {
    let store = indexed_store();
    let results = retrieve(&store, &query(OBJECTIVE_QUESTION, None, 2)).expect("retrieval");
    assert_eq!(results.len(), 2);
    for pair in results.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
        assert_eq!(pair[1].rank, pair[0].rank + 1);
    }
    assert!(results.iter().all(|result| result.distance >= 0.0));
}

#[test]
fn empty_index_and_unknown_document_return_nothing() {
    let empty = MemoryVectorStore::default();
    assert!(retrieve(&empty, &query(OBJECTIVE_QUESTION, None, 5)).expect("empty").is_empty());

    let store = indexed_store();
    let unknown = retrieve(&store, &query(OBJECTIVE_QUESTION, Some("annual-report"), 5))
        .expect("unknown document is not an error");
    assert!(unknown.is_empty());

    let generator = FixedGenerator::replying("should not be asked");
    let answer = policy().answer(OBJECTIVE_QUESTION, &unknown, &generator).expect("answer");
    assert!(answer.refused);
    assert_eq!(generator.calls(), 0);
}

#[test]
fn malformed_queries_are_rejected() {
    let store = indexed_store();
    for filter in ["", "  ", "hand book", "handbook\n"] {
        let err = retrieve(&store, &query(OBJECTIVE_QUESTION, Some(filter), 5)).unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidDocFilter(_)), "{filter:?}");
    }
    assert!(matches!(
        retrieve(&store, &query("   ", None, 5)).unwrap_err(),
        RetrievalError::EmptyQuestion
    ));
    assert!(matches!(
        retrieve(&store, &query(OBJECTIVE_QUESTION, None, 0)).unwrap_err(),
        RetrievalError::InvalidTopK
    ));
}

#[test]
fn query_model_must_match_index_model() {
    let store = indexed_store();
    let smaller = LocalHashEmbedder::new(128);
    let err = Retriever::new(&store, &smaller)
        .query(&query(OBJECTIVE_QUESTION, None, 5))
        .unwrap_err();
    assert!(matches!(err, RetrievalError::ModelMismatch { .. }));
}

#[test]
fn generation_failure_is_distinct_from_refusal() {
    let results = vec![result("handbook", 3, 0.3, 1)];
    let generator = FixedGenerator::with_replies(vec![Err(CollaboratorError::Transient(
        "request timed out".to_string(),
    ))]);
    let err = policy()
        .answer(OBJECTIVE_QUESTION, &results, &generator)
        .unwrap_err();
    assert!(matches!(err, GenerationError::Failed { attempts: 3, .. }));
    assert_eq!(generator.calls(), 3);
}

#[test]
fn transient_generation_failures_are_retried() {
    let results = vec![result("handbook", 3, 0.3, 1)];
    let generator = FixedGenerator::with_replies(vec![
        Err(CollaboratorError::Transient("503".to_string())),
        Ok("Guidance staff are supported by the handbook (page 3).".to_string()),
    ]);
    let answer = policy()
        .answer(OBJECTIVE_QUESTION, &results, &generator)
        .expect("second attempt succeeds");
    assert!(!answer.refused);
    assert_eq!(generator.calls(), 2);
}

#[test]
fn blank_generation_is_an_error() {
    let results = vec![result("handbook", 3, 0.3, 1)];
    let generator = FixedGenerator::replying("  \n ");
    let err = policy()
        .answer(OBJECTIVE_QUESTION, &results, &generator)
        .unwrap_err();
    assert!(matches!(err, GenerationError::EmptyResponse));
}

#[test]
fn cited_sources_are_unique_pages_in_rank_order() {
    let results = vec![
        result("handbook", 5, 0.2, 1),
        result("handbook", 3, 0.3, 2),
        result("handbook", 5, 0.4, 3),
        result("handbook", 9, 0.9, 4),
    ];
    let generator = FixedGenerator::replying("Answer drawn from pages 5 and 3.");
    let answer = distance_policy()
        .answer(OBJECTIVE_QUESTION, &results, &generator)
        .expect("answer");
    let pages = answer
        .cited_sources
        .iter()
        .map(|source| source.page)
        .collect::<Vec<u32>>();
    assert_eq!(pages, vec![5, 3]);
}

#[test]
fn distance_ceiling_refuses_when_every_match_is_far() {
    let results = vec![result("handbook", 3, 0.9, 1), result("handbook", 4, 1.1, 2)];
    let generator = FixedGenerator::replying("should not be asked");
    let answer = distance_policy()
        .answer(OBJECTIVE_QUESTION, &results, &generator)
        .expect("refusal");
    assert!(answer.refused);
    assert_eq!(generator.calls(), 0);
}

#[test]
fn term_coverage_ignores_distance_and_chunk_length() {
    let long_page = format!(
        "{HANDBOOK_OBJECTIVE}\n\n{}",
        HANDBOOK_STUDY_PLAN.repeat(3)
    );
    let far_but_relevant = RetrievalResult {
        chunk: chunk("handbook", 3, 0, &long_page).metadata(),
        distance: 0.95,
        rank: 1,
    };
    let near_but_unrelated = RetrievalResult {
        chunk: chunk("campus-guide", 2, 0, CAMPUS_PARKING).metadata(),
        distance: 0.1,
        rank: 2,
    };
    let results = [far_but_relevant, near_but_unrelated];

    let supporting = policy().supporting_results(OBJECTIVE_QUESTION, &results);
    assert_eq!(supporting.len(), 1);
    assert_eq!(supporting[0].chunk.doc_id, "handbook");

    assert!(policy().supporting_results("What is this?", &results).is_empty());
}

#[test]
fn full_pages_flow_from_chunker_to_answer() {
    let pages = vec![
        page("handbook", 3, HANDBOOK_PAGE_THREE),
        page("campus-guide", 2, CAMPUS_GUIDE_PAGE_TWO),
    ];
    let chunker = Chunker::new(ChunkerConfig::default()).expect("chunker");
    let (chunks, skipped) = chunker.chunk_pages(&pages);
    assert!(skipped.is_empty());
    let handbook_chunks = chunks
        .iter()
        .filter(|chunk| chunk.doc_id == "handbook")
        .collect::<Vec<_>>();
    assert_eq!(handbook_chunks.len(), 1, "the whole page fits one chunk");
    assert!(handbook_chunks[0].char_count > 700);

    let embedder = LocalHashEmbedder::default();
    let filter = NoiseFilter::new(NoiseFilterConfig::default()).expect("noise filter");
    let mut store = SqliteVectorStore::open_in_memory().expect("in-memory store");
    let report = build_index(&chunks, &embedder, &filter, &mut store, &IndexConfig::default())
        .expect("index builds");
    assert_eq!(report.meta.chunk_count, chunks.len());

    let results = Retriever::new(&store, &embedder)
        .query(&query(OBJECTIVE_QUESTION, None, 5))
        .expect("retrieval");
    assert_eq!(results[0].chunk.page, 3);
    assert!(
        results[0].distance > DEFAULT_MAX_DISTANCE,
        "a full page sits beyond the calibrated distance ceiling"
    );

    let policy = AnswerPolicy::new(AnswerPolicyConfig::default());
    let generator = FixedGenerator::replying(
        "The handbook aims to support guidance staff (Student Guidance Handbook, page 3).",
    );
    let answer = answer_question(
        &store,
        &embedder,
        &generator,
        &policy,
        &query(OBJECTIVE_QUESTION, None, 5),
    )
    .expect("answer");
    assert!(!answer.refused);
    assert!(answer.text.contains("support"));
    assert_eq!(
        answer.cited_sources,
        vec![SourceRef {
            doc_id: "handbook".to_string(),
            page: 3
        }]
    );
    assert!(generator.last_prompt().expect("prompt").contains("page 3"));

    let refusal = answer_question(
        &store,
        &embedder,
        &generator,
        &policy,
        &query(WEATHER_QUESTION, None, 5),
    )
    .expect("refusal is not an error");
    assert!(refusal.refused);
    assert_eq!(refusal.text, REFUSAL_TEXT);
    assert_eq!(generator.calls(), 1, "the weather question never reaches the generator");
}

#[test]
fn prompt_carries_grounding_rules_and_source_labels() {
    let policy = policy();
    let results = [result("handbook", 3, 0.1, 1)];
    let context = results.iter().collect::<Vec<&RetrievalResult>>();
    let prompt = policy.build_prompt(OBJECTIVE_QUESTION, &context);

    assert!(prompt.contains("only the context"));
    assert!(prompt.contains(REFUSAL_TEXT));
    assert!(prompt.contains("page number"));
    assert!(prompt.contains("[Source 1 | Student Guidance Handbook | doc_id handbook | page 3]"));
    assert!(prompt.contains(OBJECTIVE_QUESTION));
}

#[test]
fn pipeline_answers_from_sqlite_index() {
    let embedder = LocalHashEmbedder::default();
    let mut store = SqliteVectorStore::open_in_memory().expect("in-memory store");
    index_into(&mut store, &embedder);

    let generator = FixedGenerator::replying("Its objective is to support guidance staff (page 3).");
    let answer = answer_question(
        &store,
        &embedder,
        &generator,
        &policy(),
        &query(OBJECTIVE_QUESTION, Some("handbook"), 5),
    )
    .expect("answer");
    assert_eq!(answer.cited_sources[0].page, 3);

    let err = answer_question(
        &store,
        &embedder,
        &generator,
        &policy(),
        &query(OBJECTIVE_QUESTION, Some("bad id"), 5),
    )
    .unwrap_err();
    assert!(matches!(err, AskError::Retrieval(RetrievalError::InvalidDocFilter(_))));
}

#[test]
fn snippets_are_flattened_and_cut() {
    assert_eq!(snippet("two\n\nlines", 400), "two lines");
    let long = "a".repeat(450);
    let cut = snippet(&long, 400);
    assert_eq!(cut.chars().count(), 403);
    assert!(cut.ends_with("..."));
}
