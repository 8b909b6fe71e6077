use std::collections::HashMap;
use std::sync::Arc;

use rollcall::prelude::*;
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Roster
// ---------------------------------------------------------------------------

/// The classroom side of the demo, loaded from JSON:
///
/// ```json
/// {
///   "sessions": { "cs-1": "c-1" },
///   "classes":  { "c-1": ["s-1", "s-2"] }
/// }
/// ```
#[derive(Debug, Deserialize)]
struct Roster {
    /// Class meeting → class.
    sessions: HashMap<String, String>,
    /// Class → enrolled students.
    classes: HashMap<String, Vec<String>>,
}

impl Roster {
    fn sample() -> Self {
        Self {
            sessions: HashMap::from([("cs-1".into(), "c-1".into())]),
            classes: HashMap::from([(
                "c-1".into(),
                vec!["s-1".into(), "s-2".into(), "s-3".into()],
            )]),
        }
    }

    fn into_classroom(self) -> InMemoryClassroom {
        let with_sessions = self
            .sessions
            .into_iter()
            .fold(InMemoryClassroom::new(), |room, (session, class)| room.with_session(session, class));
        self.classes
            .into_iter()
            .fold(with_sessions, |room, (class, students)| room.with_students(class, students))
    }
}

fn load_roster() -> Result<Roster, Box<dyn std::error::Error>> {
    match std::env::var("ROLLCALL_ROSTER") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&raw)?)
        }
        Err(_) => Ok(Roster::sample()),
    }
}

// ---------------------------------------------------------------------------
// Server bootstrap
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rollcall::init_tracing();

    let bind = std::env::var("ROLLCALL_BIND").unwrap_or_else(|_| "0.0.0.0:8080".into());
    let mut config = EngineConfig::default();
    if let Ok(base_url) = std::env::var("ROLLCALL_BASE_URL") {
        config.checkin_base_url = base_url;
    }

    let roster = load_roster()?;
    tracing::info!(
        sessions = roster.sessions.len(),
        classes = roster.classes.len(),
        "roster loaded"
    );

    let engine = Arc::new(
        AttendanceEngine::builder()
            .config(config)
            .classroom(Arc::new(roster.into_classroom()))
            .build(),
    );
    let resumed = engine.start().await?;
    tracing::info!(resumed, %bind, "starting classroom server");

    let server = RollcallServerBuilder::new()
        .bind(&bind)
        .build(Arc::clone(&engine), DevAuthenticator)
        .await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }
    engine.shutdown().await;
    Ok(())
}
