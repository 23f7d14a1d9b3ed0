//! Query surface: nearest-neighbor search and one-shot question
//! answering over the harvested corpus.
//!
//! Both commands degrade gracefully: a missing collection, an empty
//! corpus, or a failed query embedding produce a readable message on
//! stdout rather than a process failure.

use anyhow::Result;
use serde_json::Value;

use crate::config::Config;
use crate::models::ScoredPoint;
use crate::ollama::Embedder;
use crate::qdrant::VectorIndex;

/// `cqa search`: embed the query and print ranked hits.
pub async fn run_search(
    config: &Config,
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    query: &str,
    limit: Option<u64>,
) -> Result<()> {
    if !index.collection_exists().await? {
        println!("No collection found. Run `cqa ingest` first.");
        return Ok(());
    }

    let vector = embedder.embed(query).await.unwrap_or_default();
    if vector.is_empty() {
        println!("Could not embed the query. Is the embedding endpoint running?");
        return Ok(());
    }

    let limit = limit.unwrap_or(config.query.top_k);
    let hits = index.search(&vector, limit).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (rank, hit) in hits.iter().enumerate() {
        let title = payload_str(hit, "page_title").unwrap_or_else(|| format!("point {}", hit.id));
        let space = payload_str(hit, "space_key").unwrap_or_default();
        println!("{:>2}. [{:.4}] {} ({})", rank + 1, hit.score, title, space);
        if let Some(url) = payload_str(hit, "url") {
            println!("    {}", url);
        }
    }

    Ok(())
}

/// `cqa ask`: retrieve context and generate one answer.
pub async fn run_ask(
    config: &Config,
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    question: &str,
) -> Result<()> {
    if !index.collection_exists().await? {
        println!("No knowledge base yet. Run `cqa ingest` first.");
        return Ok(());
    }
    if let Ok(Some(stats)) = index.stats().await {
        if stats.points_count == 0 {
            println!("The collection is empty; ingestion may still be running. Try again later.");
            return Ok(());
        }
    }

    let vector = embedder.embed(question).await.unwrap_or_default();
    if vector.is_empty() {
        println!("Could not embed the question. Is the embedding endpoint running?");
        return Ok(());
    }

    let hits = index.search(&vector, config.query.top_k).await?;
    if hits.is_empty() {
        println!("No relevant documents found for that question.");
        return Ok(());
    }

    let (context, sources) = build_context(&hits, config.query.max_context_chars);

    let prompt = format!(
        "Answer the question using only the context below. If the context does not \
         contain the answer, say so instead of guessing.\n\n\
         Context:\n{}\n\nQuestion: {}\n\nAnswer:",
        context, question
    );

    let answer = embedder.generate(&prompt, config.query.context_length).await?;
    println!("{}", answer);

    if !sources.is_empty() {
        println!();
        println!("Sources:");
        for (title, score, url) in sources {
            match url {
                Some(url) => println!("  - {} [{:.4}] {}", title, score, url),
                None => println!("  - {} [{:.4}]", title, score),
            }
        }
    }

    Ok(())
}

/// Concatenate hit payload texts up to the character budget; hits that
/// would overflow it are dropped from both the context and the source
/// list.
fn build_context(
    hits: &[ScoredPoint],
    max_chars: usize,
) -> (String, Vec<(String, f32, Option<String>)>) {
    let mut context = String::new();
    let mut sources = Vec::new();

    for hit in hits {
        let Some(text) = payload_str(hit, "text") else {
            continue;
        };
        if context.len() + text.len() >= max_chars {
            continue;
        }
        context.push_str(&text);
        context.push_str("\n\n");
        sources.push((
            payload_str(hit, "page_title").unwrap_or_else(|| format!("point {}", hit.id)),
            hit.score,
            payload_str(hit, "url"),
        ));
    }

    (context, sources)
}

fn payload_str(hit: &ScoredPoint, key: &str) -> Option<String> {
    hit.payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: u64, score: f32, text: &str, title: &str) -> ScoredPoint {
        ScoredPoint {
            id,
            score,
            payload: serde_json::json!({ "text": text, "page_title": title }),
        }
    }

    #[test]
    fn context_respects_char_budget() {
        let hits = vec![
            hit(0, 0.9, "aaaaaaaaaa", "A"),
            hit(1, 0.8, "bbbbbbbbbb", "B"),
            hit(2, 0.7, "cccccccccc", "C"),
        ];
        // Budget fits the first hit plus separators, but not the second.
        let (context, sources) = build_context(&hits, 14);
        assert!(context.contains("aaaaaaaaaa"));
        assert!(!context.contains("bbbbbbbbbb"));
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].0, "A");
    }

    #[test]
    fn hits_without_text_are_ignored() {
        let hits = vec![ScoredPoint {
            id: 3,
            score: 0.5,
            payload: serde_json::json!({ "page_title": "no text here" }),
        }];
        let (context, sources) = build_context(&hits, 1000);
        assert!(context.is_empty());
        assert!(sources.is_empty());
    }
}
