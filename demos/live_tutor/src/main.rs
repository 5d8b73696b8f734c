//! Console tutor: type to the model, hear it answer, see its text and
//! display cards stream in. Requires `GEMINI_API_KEY` and a working
//! microphone/speaker.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use parlo_audio::VoiceEngine;
use parlo_live::{FunctionDecl, GeminiEndpoint, SessionConfig, SessionController};
use secrecy::SecretString;
use serde_json::json;
use tokio::io::AsyncBufReadExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let credential =
        std::env::var("GEMINI_API_KEY").context("GEMINI_API_KEY is not set")?;

    let config = SessionConfig::new()
        .with_voice("Aoede")
        .with_text_and_audio()
        .with_instruction(
            "You are a friendly, patient language tutor. Keep spoken answers short. \
             Use display_text to show vocabulary, notes, and corrections.",
        )
        .with_tool(
            FunctionDecl::new("display_text")
                .with_description("Show a text card to the learner")
                .with_parameters(json!({
                    "type": "object",
                    "properties": {
                        "text": { "type": "string" },
                        "type": {
                            "type": "string",
                            "enum": ["note", "vocabulary", "correction"]
                        }
                    },
                    "required": ["text", "type"]
                })),
        );

    let controller = Arc::new(SessionController::new(
        Arc::new(GeminiEndpoint::new()),
        SecretString::from(credential),
        config,
    )?);
    let engine = VoiceEngine::desktop(controller);

    let mut text = engine.subscribe_text();
    tokio::spawn(async move {
        while let Ok(delta) = text.recv().await {
            print!("{delta}");
            std::io::stdout().flush().ok();
        }
    });

    let mut tools = engine.subscribe_tool_calls();
    tokio::spawn(async move {
        while let Ok(call) = tools.recv().await {
            let kind = call.args["type"].as_str().unwrap_or("note");
            let body = call.args["text"].as_str().unwrap_or_default();
            println!("\n  [{kind}] {body}");
        }
    });

    let mut state = engine.subscribe_state();
    tokio::spawn(async move {
        while let Ok(state) = state.recv().await {
            tracing::info!(?state, "connection state changed");
        }
    });

    engine.connect().await?;
    if let Err(error) = engine.start_recording() {
        tracing::warn!(%error, "microphone unavailable, text input only");
    }
    println!("Connected. Type a message and press Enter; Ctrl-D to quit.");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        engine.send_text(line).await?;
    }

    engine.disconnect().await;
    println!("\nBye!");
    Ok(())
}
