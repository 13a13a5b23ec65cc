use anyhow::Result;
use medrag_context::{ChunkConfig, MedicalRecord};
use medrag_embed::{EmbeddingProvider, HashingEmbedder};
use medrag_retriever::config::ArtifactPaths;
use medrag_retriever::retrieval::builder::IndexBuilder;
use medrag_retriever::retrieval::retriever::{QueryRequest, Retriever};
use medrag_retriever::storage::IndexArtifact;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const DIM: usize = 8192;

fn provider() -> Arc<dyn EmbeddingProvider> {
    Arc::new(HashingEmbedder::new(DIM).unwrap())
}

/// A question made of 60 distinct words that no other record uses.
fn question(topic: &str) -> String {
    let words: Vec<String> = (0..60).map(|i| format!("{topic}{i}")).collect();
    format!("{}?", words.join(" "))
}

fn records() -> Vec<MedicalRecord> {
    ["cardio", "neuro", "derma"]
        .iter()
        .map(|topic| MedicalRecord::new(question(topic), "", format!("Treat {topic}.")))
        .collect()
}

async fn build(records: &[MedicalRecord]) -> Result<IndexArtifact> {
    let (artifact, _) = IndexBuilder::new(ChunkConfig::default(), provider())?
        .build(records)
        .await?;
    Ok(artifact)
}

#[tokio::test]
async fn test_verbatim_question_ranks_its_record_first() -> Result<()> {
    let artifact = build(&records()).await?;
    assert!(artifact.len() >= 3);

    let retriever = Retriever::new(Arc::new(artifact), provider())?;
    let result = retriever.query(&question("neuro"), 3).await?;

    let top = &result.results[0];
    assert_eq!(top.chunk.record_index, 1);
    assert!(top.score > 0.9, "score was {}", top.score);
    assert!(result.results.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(result.confidence > 0.0 && result.confidence <= 1.0);
    Ok(())
}

#[tokio::test]
async fn test_short_questions_match_their_record() -> Result<()> {
    let questions = [
        "Which everyday lifestyle changes help an adult with newly diagnosed high blood pressure lower home readings without starting daily medication right away?",
        "What warning signs suggest that a young child with a persistent dry cough and mild fever may have developed pneumonia?",
        "How should a recreational runner treat a mildly sprained ankle during the first two days after twisting it on uneven ground?",
    ];
    let records: Vec<MedicalRecord> = questions
        .iter()
        .zip(["Exercise.", "Tachypnea.", "Ice."])
        .map(|(q, a)| MedicalRecord::new(*q, "", a))
        .collect();

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbedder::new(65536)?);
    let (artifact, _) = IndexBuilder::new(ChunkConfig::default(), Arc::clone(&embedder))?
        .build(&records)
        .await?;
    assert!(artifact.len() >= 3);

    let retriever = Retriever::new(Arc::new(artifact), embedder)?;
    for (record_index, question) in questions.iter().enumerate() {
        let result = retriever.query(question, 3).await?;
        let top = &result.results[0];
        assert_eq!(top.chunk.record_index, record_index);
        assert!(top.score > 0.9, "score was {}", top.score);
    }
    Ok(())
}

#[tokio::test]
async fn test_top_k_larger_than_index() -> Result<()> {
    let artifact = build(&records()[..2]).await?;
    assert_eq!(artifact.len(), 2);

    let retriever = Retriever::new(Arc::new(artifact), provider())?;
    let result = retriever.query("cardio1 neuro2", 5).await?;
    assert_eq!(result.results.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_oversized_first_chunk_is_still_included() -> Result<()> {
    let retriever = Retriever::new(Arc::new(build(&records()).await?), provider())?;
    let response = retriever
        .answer_context(&QueryRequest {
            query_text: question("derma"),
            top_k: 3,
            max_context_chars: 50,
        })
        .await?;

    assert_eq!(response.sources.len(), 1);
    assert_eq!(response.sources[0].record_index, 2);
    assert!(response.answer_context.chars().count() > 50);
    assert!(response.answer_context.starts_with("Question: derma0 derma1"));
    Ok(())
}

#[tokio::test]
async fn test_context_respects_budget() -> Result<()> {
    let retriever = Retriever::new(Arc::new(build(&records()).await?), provider())?;
    let first = retriever.query(&question("cardio"), 3).await?.results[0]
        .chunk
        .chunk_text
        .chars()
        .count();

    for budget in [first, first + 1, first + 10, 2 * first + 2, 10_000] {
        let response = retriever
            .answer_context(&QueryRequest {
                query_text: question("cardio"),
                top_k: 3,
                max_context_chars: budget,
            })
            .await?;
        assert!(response.answer_context.chars().count() <= budget);
        assert!(!response.sources.is_empty());
    }
    Ok(())
}

#[tokio::test]
async fn test_save_load_round_trip() -> Result<()> {
    let dir = tempdir()?;
    let paths = ArtifactPaths::in_dir(dir.path().join("vector_db"));

    let (built, _) = IndexBuilder::new(ChunkConfig::new(120, 30)?, provider())?
        .with_batch_size(4)
        .build_and_save(&records(), &paths, Duration::from_secs(10))
        .await?;
    let loaded = IndexArtifact::load_with_timeout(paths.clone(), Duration::from_secs(10)).await?;

    assert_eq!(&loaded, built.as_ref());
    for (position, chunk) in loaded.chunks().iter().enumerate() {
        assert_eq!(loaded.index().ids()[position], chunk.id);
    }

    // Rebuilding replaces the pair as a whole.
    IndexBuilder::new(ChunkConfig::default(), provider())?
        .build_and_save(&records()[..1], &paths, Duration::from_secs(10))
        .await?;
    let rebuilt = IndexArtifact::load(&paths)?;
    assert_eq!(rebuilt.len(), 1);
    assert_eq!(rebuilt.header().chunk_size, 1000);
    Ok(())
}

#[tokio::test]
async fn test_search_normalizes_query() -> Result<()> {
    let artifact = build(&records()).await?;
    let query = HashingEmbedder::new(DIM)?.embed_one("cardio3 neuro4 neuro5");
    let doubled: Vec<f32> = query.iter().map(|v| v * 2.0).collect();

    let a = artifact.index().search(&query, 3)?;
    let b = artifact.index().search(&doubled, 3)?;
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(&b) {
        assert_eq!(x.position, y.position);
        assert!((x.score - y.score).abs() < 1e-6);
    }
    Ok(())
}

#[tokio::test]
async fn test_empty_index() -> Result<()> {
    let artifact = build(&[]).await?;
    let query = HashingEmbedder::new(DIM)?.embed_one("anything");
    assert!(artifact.index().search(&query, 5)?.is_empty());

    let retriever = Retriever::new(Arc::new(artifact), provider())?;
    let result = retriever.query("anything", 5).await?;
    assert!(result.results.is_empty());
    assert_eq!(result.confidence, 0.0);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_queries_share_index() -> Result<()> {
    let retriever = Arc::new(Retriever::new(Arc::new(build(&records()).await?), provider())?);

    let mut handles = Vec::new();
    for topic in ["cardio", "neuro", "derma", "cardio", "neuro", "derma"] {
        let retriever = Arc::clone(&retriever);
        handles.push(tokio::spawn(async move {
            retriever.query(&question(topic), 1).await
        }));
    }

    let mut tops = Vec::new();
    for handle in handles {
        tops.push(handle.await??.results[0].chunk.record_index);
    }
    assert_eq!(tops, vec![0, 1, 2, 0, 1, 2]);
    Ok(())
}
