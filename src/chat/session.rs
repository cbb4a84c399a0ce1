use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::chat::llm::ChatModel;
use crate::chat::memory::ConversationMemory;
use crate::chat::prompt;
use crate::config::Config;
use crate::db::Db;
use crate::db::models::SearchResult;
use crate::embedder::Embedder;
use crate::techniques::Technique;
use crate::text::{self, QueryRejection};

/// Per-session knobs, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub system_prompt: String,
    pub num_similar: usize,
    pub max_query_length: usize,
    pub memory_turns: usize,
    pub exit_commands: Vec<String>,
}

impl SessionSettings {
    pub fn from_config(config: &Config, num_similar: usize) -> Self {
        Self {
            system_prompt: config.system_prompt.clone(),
            num_similar,
            max_query_length: config.max_query_length,
            memory_turns: config.memory_turns,
            exit_commands: config.exit_commands.clone(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    Answer(String),
    /// The query failed validation; the model was not called.
    Rejected(QueryRejection),
}

/// One interactive conversation over a vector store.
pub struct ChatSession<'a> {
    db: &'a Db,
    embedder: &'a dyn Embedder,
    model: &'a dyn ChatModel,
    settings: SessionSettings,
    memory: ConversationMemory,
}

impl<'a> ChatSession<'a> {
    pub fn new(
        db: &'a Db,
        embedder: &'a dyn Embedder,
        model: &'a dyn ChatModel,
        settings: SessionSettings,
    ) -> Self {
        let memory = ConversationMemory::new(settings.memory_turns);
        Self {
            db,
            embedder,
            model,
            settings,
            memory,
        }
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    /// Trimmed, case-insensitive match against the configured exit commands.
    pub fn is_exit_command(&self, input: &str) -> bool {
        let input = input.trim();
        self.settings
            .exit_commands
            .iter()
            .any(|c| c.eq_ignore_ascii_case(input))
    }

    /// Top-N chunks for `query`, plus the technique the query names by ID
    /// when that technique is stored but was not retrieved.
    pub fn retrieve(&self, query: &str) -> Result<(Option<Technique>, Vec<SearchResult>)> {
        let query_vector = self
            .embedder
            .embed(query)
            .context("failed to embed query")?;
        let results = self
            .db
            .search(&query_vector, self.settings.num_similar)
            .context("similarity search failed")?;

        let pinned = match text::extract_technique_id(query) {
            Some(id) if !results.iter().any(|r| r.technique.id.eq_ignore_ascii_case(&id)) => {
                self.db.find_technique(&id).context("technique lookup failed")?
            }
            _ => None,
        };

        debug!("Retrieved {} chunks for query", results.len());
        if let Some(t) = &pinned {
            debug!("  pinned {} {}", t.display_id(), t.display_name());
        }
        for r in &results {
            debug!(
                "  {:.3} #{} {} {}: {}",
                r.similarity,
                r.chunk_id,
                r.technique.display_id(),
                r.technique.display_name(),
                text::truncate_text(&r.chunk_content, 80, "...")
            );
        }

        Ok((pinned, results))
    }

    /// Answers one query and records the exchange in memory.
    pub fn ask(&mut self, query: &str) -> Result<Reply> {
        let query = query.trim();
        if let Err(rejection) = text::validate_query(query, self.settings.max_query_length) {
            info!("Rejected query: {rejection}");
            return Ok(Reply::Rejected(rejection));
        }

        let (pinned, results) = self.retrieve(query)?;
        let context = prompt::build_context(pinned.as_ref(), &results);
        let messages = prompt::build_messages(
            &self.settings.system_prompt,
            &self.memory.transcript(),
            &context,
            query,
        );
        debug!("Context is {} characters", context.chars().count());

        let answer = self
            .model
            .complete(&messages)
            .context("chat model call failed")?;
        self.memory.push(query, &answer);

        Ok(Reply::Answer(answer))
    }

    /// Reads queries line by line until EOF or an exit command.
    pub fn run<R: BufRead, W: Write>(&mut self, mut input: R, mut out: W) -> Result<()> {
        writeln!(
            out,
            "Ask me questions about tactics, techniques, or countermeasures.\n\
             End the session with: {}",
            self.settings.exit_commands.join(", ")
        )?;

        let mut line = String::new();
        loop {
            write!(out, "\nYou: ")?;
            out.flush()?;

            line.clear();
            if input.read_line(&mut line)? == 0 {
                writeln!(out, "\nSession ended. Goodbye!")?;
                break;
            }

            if self.is_exit_command(&line) {
                writeln!(
                    out,
                    "\nAssistant: Thank you for using the MITRE ATT&CK Expert Chatbot. Goodbye!"
                )?;
                break;
            }

            match self.ask(&line)? {
                Reply::Answer(answer) => writeln!(out, "\nAssistant: {answer}")?,
                Reply::Rejected(rejection) => writeln!(out, "{rejection}")?,
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::llm::ChatMessage;
    use crate::db::StoreInfo;
    use crate::embedder::mock::MockEmbedder;
    use crate::indexer::core::{Indexer, split_techniques};
    use crate::indexer::splitter::RecursiveSplitter;
    use crate::openai::ApiError;
    use crate::techniques::parse_techniques;
    use std::cell::RefCell;

    const CORPUS: &str = r#"[
        {"id": "T1059", "name": "Command and Scripting Interpreter",
         "description": "Adversaries may abuse PowerShell, bash and other interpreters to execute commands."},
        {"id": "T1566", "name": "Phishing",
         "description": "Adversaries may send spearphishing emails with malicious attachments."}
    ]"#;

    #[derive(Default)]
    struct RecordingModel {
        calls: RefCell<Vec<Vec<ChatMessage>>>,
    }

    impl ChatModel for RecordingModel {
        fn complete(&self, messages: &[ChatMessage]) -> Result<String, ApiError> {
            let mut calls = self.calls.borrow_mut();
            calls.push(messages.to_vec());
            Ok(format!("answer {}", calls.len()))
        }
    }

    fn seeded_db(embedder: &MockEmbedder) -> Db {
        let techniques = parse_techniques(CORPUS).unwrap();
        let mut db = Db::open_in_memory(&StoreInfo::new(
            "local",
            embedder.model_name(),
            embedder.dimensions(),
            "mitre",
        ))
        .unwrap();
        let sets = split_techniques(&techniques, &RecursiveSplitter::new(256, 64));
        Indexer::new(embedder, 10).index(&mut db, &sets).unwrap();
        db
    }

    fn settings(num_similar: usize) -> SessionSettings {
        SessionSettings::from_config(&Config::default(), num_similar)
    }

    #[test]
    fn test_exit_commands_skip_model() {
        let embedder = MockEmbedder::new(256);
        let db = seeded_db(&embedder);
        let model = RecordingModel::default();

        for command in [":exit", "  :QUIT  ", ":terminate", ":Salir"] {
            let mut session = ChatSession::new(&db, &embedder, &model, settings(2));
            let mut out = Vec::new();
            session
                .run(format!("{command}\nwhat is phishing?\n").as_bytes(), &mut out)
                .unwrap();
            assert!(String::from_utf8(out).unwrap().contains("Goodbye"));
        }
        assert!(model.calls.borrow().is_empty());
    }

    #[test]
    fn test_run_answers_until_eof() {
        let embedder = MockEmbedder::new(256);
        let db = seeded_db(&embedder);
        let model = RecordingModel::default();
        let mut session = ChatSession::new(&db, &embedder, &model, settings(2));

        let mut out = Vec::new();
        session
            .run("What is phishing?\nHow do I mitigate it?\n".as_bytes(), &mut out)
            .unwrap();

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("Assistant: answer 1"));
        assert!(printed.contains("Assistant: answer 2"));
        assert_eq!(session.memory().len(), 2);

        let calls = model.calls.borrow();
        assert_eq!(calls.len(), 2);
        // The second turn carries the first exchange as history
        assert!(calls[1][1]
            .content
            .contains("User: What is phishing?\nAssistant: answer 1"));
    }

    #[test]
    fn test_rejected_query_skips_model() {
        let embedder = MockEmbedder::new(256);
        let db = seeded_db(&embedder);
        let model = RecordingModel::default();
        let mut session = ChatSession::new(&db, &embedder, &model, settings(2));

        let reply = session.ask("<script>alert(1)</script>").unwrap();
        assert_eq!(reply, Reply::Rejected(QueryRejection::Unsafe));

        let reply = session.ask(&"a".repeat(501)).unwrap();
        assert_eq!(reply, Reply::Rejected(QueryRejection::TooLong { max: 500 }));

        assert!(model.calls.borrow().is_empty());
        assert!(session.memory().is_empty());
    }

    #[test]
    fn test_empty_query_uses_retrieval() {
        let embedder = MockEmbedder::new(256);
        let db = seeded_db(&embedder);
        let model = RecordingModel::default();
        let mut session = ChatSession::new(&db, &embedder, &model, settings(2));

        let reply = session.ask("   ").unwrap();
        assert_eq!(reply, Reply::Answer("answer 1".to_string()));
        assert_eq!(model.calls.borrow().len(), 1);
    }

    #[test]
    fn test_technique_id_is_pinned() {
        let embedder = MockEmbedder::new(256);
        let db = seeded_db(&embedder);
        let model = RecordingModel::default();
        let session = ChatSession::new(&db, &embedder, &model, settings(1));

        let (pinned, results) = session
            .retrieve("PowerShell interpreters execute commands, and what about t1566?")
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].technique.id, "T1059");
        assert_eq!(pinned.unwrap().name, "Phishing");

        // Already retrieved, so nothing is pinned
        let (pinned, _) = session
            .retrieve("PowerShell interpreters execute commands T1059")
            .unwrap();
        assert!(pinned.is_none());
    }

    #[test]
    fn test_similar_query_retrieves_technique() {
        let embedder = MockEmbedder::new(256);
        let db = seeded_db(&embedder);
        let model = RecordingModel::default();
        let session = ChatSession::new(&db, &embedder, &model, settings(1));

        let (_, results) = session
            .retrieve("spearphishing emails with malicious attachments")
            .unwrap();
        assert_eq!(results[0].technique.id, "T1566");
    }
}
