//! End-to-end chat flow: a session imported from CSV, a knowledge base built
//! from markdown notes, and the agent answering through its tools.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use race_engineer::agent::{Agent, ChatSession, KnowledgeSource, NO_LLM_HINT};
use race_engineer::config::{KnowledgeBaseConfig, StrategyConfig};
use race_engineer::kb::KnowledgeBase;
use race_engineer::llm::{ChatMessage, ChatModel, Embedder};
use race_engineer::telemetry::{FileSource, SessionSource};
use race_engineer::{Error, Result, Session, SessionId, SessionKind, Storage};

const LAPS_CSV: &str = "\
Driver,LapNumber,LapTime_s,S1_s,S2_s,S3_s,Compound,Stint
VER,1,95.0,,,,MEDIUM,1
VER,2,95.2,,,,MEDIUM,1
VER,3,95.4,,,,MEDIUM,1
VER,4,95.6,,,,MEDIUM,1
LEC,1,95.5,,,,MEDIUM,1
LEC,2,96.0,,,,MEDIUM,1
LEC,3,96.5,,,,MEDIUM,1
LEC,4,97.0,,,,MEDIUM,1
";

const UNDERCUT_NOTE: &str = "# Undercut\n\nPit before the rival and use the fresh tyre \
to gain time while they stay out on worn rubber.\n";

const RAIN_NOTE: &str = "# Wet weather\n\nSwitch to intermediates when the track is damp \
and to full wets in heavy rain.\n";

/// Embeds text as counts of a few strategy words, plus a constant term.
#[derive(Debug, Default)]
struct WordCountEmbedder {
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for WordCountEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                let mut v: Vec<f32> = ["undercut", "tyre", "rain", "wet"]
                    .iter()
                    .map(|w| t.matches(w).count() as f32)
                    .collect();
                v.push(0.1);
                v
            })
            .collect())
    }

    fn model(&self) -> &str {
        "word-count"
    }
}

/// Chat model that replays canned replies in order.
#[derive(Debug, Default)]
struct CannedChat {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl CannedChat {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| (*r).to_string()).collect()),
            prompts: Mutex::default(),
        }
    }
}

#[async_trait]
impl ChatModel for CannedChat {
    async fn complete(&self, messages: &[ChatMessage], _stop: &[&str]) -> Result<String> {
        let prompt = messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n");
        self.prompts.lock().unwrap().push(prompt);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::llm_response("no canned reply left"))
    }

    fn model_name(&self) -> &str {
        "canned"
    }
}

async fn imported_session(dir: &std::path::Path) -> Session {
    let path = dir.join("bahrain.csv");
    std::fs::write(&path, LAPS_CSV).unwrap();
    let id = SessionId::new(2024, "Bahrain", SessionKind::R);
    FileSource::new(path).fetch(&id).await.unwrap()
}

fn kb_config(dir: &std::path::Path) -> KnowledgeBaseConfig {
    let kb_dir = dir.join("kb");
    std::fs::create_dir_all(&kb_dir).unwrap();
    std::fs::write(kb_dir.join("undercut.md"), UNDERCUT_NOTE).unwrap();
    std::fs::write(kb_dir.join("rain.md"), RAIN_NOTE).unwrap();
    KnowledgeBaseConfig {
        dir: kb_dir,
        ..KnowledgeBaseConfig::default()
    }
}

#[tokio::test]
async fn test_offline_chat_answers_quick_commands() {
    let dir = tempfile::tempdir().unwrap();
    let session = imported_session(dir.path()).await;

    let mut chat = ChatSession::new(
        None,
        StrategyConfig::default(),
        KnowledgeSource::Unavailable("LLM is disabled".to_string()),
    );
    chat.load(session);

    assert_eq!(
        chat.ask("lap summary ver").await,
        "Driver VER: best=95.000s avg=95.300s"
    );
    assert_eq!(
        chat.ask("VER vs LEC").await,
        "Δ(A-B) mean=-0.950s, samples=4"
    );
    assert_eq!(
        chat.ask("VER vs LEC pit loss 20 undercut?").await,
        "Undercut VER on LEC: not viable | defender_deg≈0.500s/lap, horizon=2, gain≈1.0s vs pit_loss=20.0s"
    );
    assert_eq!(
        chat.ask("how do tyres behave?").await,
        "KB unavailable: LLM is disabled"
    );
    assert_eq!(chat.ask("who won?").await, NO_LLM_HINT);
    assert_eq!(chat.history().len(), 10);
}

#[tokio::test]
async fn test_agent_answers_from_knowledge_base() {
    let dir = tempfile::tempdir().unwrap();
    let session = imported_session(dir.path()).await;
    let config = kb_config(dir.path());
    let storage = Storage::open(dir.path().join("cache.db")).unwrap();

    let embedder = Arc::new(WordCountEmbedder::default());
    let llm = Arc::new(CannedChat::new(&[
        "The question is about strategy theory.\nAction: kb_ask\nAction Input: What is an undercut?",
        "Pit first and use the fresh tyre.",
        "I now know the final answer\nFinal Answer: Pit first and use the fresh tyre (kb_ask).",
    ]));

    let kb = KnowledgeBase::build(&config, &storage, embedder.clone(), llm.clone(), false)
        .await
        .unwrap()
        .expect("notes are indexed");
    assert_eq!(kb.chunk_count(), 2);

    let agent = Agent::new(llm.clone(), 4);
    let mut chat = ChatSession::new(
        Some(agent),
        StrategyConfig::default(),
        KnowledgeSource::Ready(Arc::new(kb)),
    );
    chat.load(session);

    let answer = chat.ask("What is an undercut?").await;
    assert_eq!(answer, "Pit first and use the fresh tyre (kb_ask).");

    let prompts = llm.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[0].contains("Question: Use tool kb_ask with input 'What is an undercut?'"));
    // The undercut note ranks first for an undercut question.
    let undercut_at = prompts[1].find("fresh tyre").expect("undercut note in context");
    let rain_at = prompts[1].find("full wets").unwrap_or(usize::MAX);
    assert!(undercut_at < rain_at);
    assert!(prompts[2].contains("Observation: Pit first and use the fresh tyre."));
}

#[tokio::test]
async fn test_knowledge_base_reuses_stored_embeddings() {
    let dir = tempfile::tempdir().unwrap();
    let config = kb_config(dir.path());
    let db = dir.path().join("cache.db");
    let embedder = Arc::new(WordCountEmbedder::default());
    let llm = Arc::new(CannedChat::default());

    {
        let storage = Storage::open(&db).unwrap();
        KnowledgeBase::build(&config, &storage, embedder.clone(), llm.clone(), false)
            .await
            .unwrap();
    }
    let calls_after_index = embedder.calls.load(Ordering::SeqCst);
    assert!(calls_after_index > 0);

    let storage = Storage::open(&db).unwrap();
    let kb = KnowledgeBase::build(&config, &storage, embedder.clone(), llm.clone(), false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(kb.chunk_count(), 2);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), calls_after_index);

    let status = KnowledgeBase::status(&config, &storage, "word-count").unwrap();
    assert_eq!(status.documents, 2);
    assert_eq!(status.stored_chunks, 2);
    assert!(status.up_to_date);

    std::fs::write(config.dir.join("pit.md"), "# Pit stops\n\nA stop costs about 20 seconds.\n")
        .unwrap();
    let status = KnowledgeBase::status(&config, &storage, "word-count").unwrap();
    assert!(!status.up_to_date);
}
