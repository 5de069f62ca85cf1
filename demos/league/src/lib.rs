//! League Example
//!
//! A small sports-league domain driven by command and query sagas.
//!
//! # Flow
//!
//! ```text
//! create-league ──► CommandSaga<CreateLeague>
//!                      │ validate: name and location present, league not formed
//!                      │ execute:  League.Formed.v1 ──► leagues/league/{name}
//!                      └ notify:   StepComplete, CommandComplete ──► hooks
//!
//! get-league-summary ──► QuerySaga<GetLeagueSummary>
//!                      │ request:  League_Summary_Information over leagues/league/{name}
//!                      │ run:      fold the league log
//!                      └ collate:  summary JSON ──► output target
//! ```
//!
//! Both sagas can be redriven with the same request at any point; every step
//! checks the command or query log before acting.

use chrono::{DateTime, Utc};
use sagaflow_core::event::{Event, SerializedEvent};
use sagaflow_core::ledger::ProjectionKey;
use sagaflow_core::notification::ImpactedEntity;
use sagaflow_core::projection::{Projection, ProjectionError, ProjectionRegistry, decode_event};
use sagaflow_core::stream::OperationIdentity;
use sagaflow_core::summary::{CommandSummary, QuerySummary};
use sagaflow_core::{Clock, EventStore};
use sagaflow_runtime::journal;
use sagaflow_runtime::{
    CommandContext, CommandHandler, CommandSaga, CommandSagaConfig, HandlerFuture,
    ProcessedProjections, QueryHandler, QuerySaga, QuerySagaConfig, SagaError, TransportRegistry,
    Validation,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Domain every league log lives in.
pub const DOMAIN: &str = "leagues";

/// Command name of [`CreateLeague`].
pub const CREATE_LEAGUE: &str = "create-league";

/// Query name of [`GetLeagueSummary`].
pub const GET_LEAGUE_SUMMARY: &str = "get-league-summary";

/// Entity type named in notifications about a league.
pub const LEAGUE_ENTITY: &str = "League";

/// Identity of the entity log of the league called `name`.
#[must_use]
pub fn league_log(name: &str) -> OperationIdentity {
    OperationIdentity::new(DOMAIN, "league", name)
}

// ============================================================================
// Events
// ============================================================================

/// Facts appended to a league log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeagueEvent {
    /// The league was formed.
    Formed {
        /// League name, also the log key.
        name: String,
        /// Where the league plays.
        location: String,
        /// When the league was formed.
        formed_at: DateTime<Utc>,
    },
}

impl LeagueEvent {
    /// Type identifier of [`LeagueEvent::Formed`].
    pub const FORMED: &'static str = "League.Formed.v1";
}

impl Event for LeagueEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Formed { .. } => Self::FORMED,
        }
    }

    fn as_of(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Formed { formed_at, .. } => Some(*formed_at),
        }
    }
}

// ============================================================================
// Projection
// ============================================================================

/// Read-model of one league.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeagueSummary {
    /// League name; empty until the league is formed.
    pub name: String,
    /// Where the league plays.
    pub location: String,
    /// When the league was formed.
    pub formed_at: Option<DateTime<Utc>>,
}

impl LeagueSummary {
    /// Whether a `Formed` event has been folded.
    #[must_use]
    pub const fn is_formed(&self) -> bool {
        self.formed_at.is_some()
    }
}

/// Folds a league log into a [`LeagueSummary`].
#[derive(Clone, Copy, Debug, Default)]
pub struct LeagueSummaryProjection;

impl LeagueSummaryProjection {
    /// Registered projection name.
    pub const NAME: &'static str = "League_Summary_Information";
}

impl Projection for LeagueSummaryProjection {
    type State = LeagueSummary;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(&self, state: &mut LeagueSummary, event: &SerializedEvent) -> Result<bool, ProjectionError> {
        if event.event_type != LeagueEvent::FORMED {
            return Ok(false);
        }
        let LeagueEvent::Formed {
            name,
            location,
            formed_at,
        } = decode_event(event)?;
        if state.is_formed() {
            return Err(ProjectionError::InvalidEvent(format!(
                "League {name} formed twice"
            )));
        }
        *state = LeagueSummary {
            name,
            location,
            formed_at: Some(formed_at),
        };
        Ok(true)
    }
}

/// Registry holding every projection the league queries use.
#[must_use]
pub fn projection_registry() -> ProjectionRegistry {
    ProjectionRegistry::new().register::<LeagueSummaryProjection>()
}

// ============================================================================
// create-league
// ============================================================================

/// Forms a new league from `LeagueName` and `Location`.
#[derive(Clone, Copy, Debug, Default)]
pub struct CreateLeague;

impl CommandHandler for CreateLeague {
    fn step_name(&self) -> &str {
        "form-league"
    }

    fn validate<'a>(&'a self, context: &'a CommandContext) -> HandlerFuture<'a, Validation> {
        Box::pin(async move {
            let name: String = context.parameter("LeagueName")?.unwrap_or_default();
            if name.trim().is_empty() {
                return Ok(Validation::fatal("League name is required"));
            }
            let location: String = context.parameter("Location")?.unwrap_or_default();
            if location.trim().is_empty() {
                return Ok(Validation::fatal("League location is required"));
            }

            let existing =
                journal::project(context.store.as_ref(), &league_log(&name), &LeagueSummaryProjection).await?;
            if existing.is_formed() {
                return Ok(Validation::fatal(format!("League {name} already exists")));
            }
            Ok(Validation::Valid)
        })
    }

    fn execute<'a>(&'a self, context: &'a CommandContext) -> HandlerFuture<'a, ()> {
        Box::pin(async move {
            let name: String = context.required_parameter("LeagueName")?;
            let location: String = context.required_parameter("Location")?;
            let log = league_log(&name);

            context.store.create_if_not_exists(log.stream_id()).await?;
            // A run interrupted after the append must not form the league twice.
            let existing = journal::project(context.store.as_ref(), &log, &LeagueSummaryProjection).await?;
            if existing.is_formed() {
                tracing::info!(league = %name, "League already formed");
                return Ok(());
            }

            let formed = LeagueEvent::Formed {
                name: name.clone(),
                location,
                formed_at: context.clock.now(),
            };
            journal::append(context.store.as_ref(), &log, &[formed]).await?;
            tracing::info!(league = %name, "League formed");
            Ok(())
        })
    }

    fn impacted_entities(&self, summary: &CommandSummary) -> Result<Vec<ImpactedEntity>, SagaError> {
        let name: String = summary
            .parameter("LeagueName")?
            .ok_or_else(|| SagaError::structural("Missing parameter LeagueName"))?;
        Ok(vec![ImpactedEntity::new(LEAGUE_ENTITY, name)])
    }
}

// ============================================================================
// get-league-summary
// ============================================================================

/// Returns the [`LeagueSummary`] of `League_Name`, or `null` if the league
/// was never formed.
#[derive(Clone, Copy, Debug, Default)]
pub struct GetLeagueSummary;

impl GetLeagueSummary {
    fn league_name(summary: &QuerySummary) -> Result<String, SagaError> {
        summary
            .parameter::<String>("League_Name")?
            .ok_or_else(|| SagaError::structural("Missing parameter League_Name"))
    }
}

impl QueryHandler for GetLeagueSummary {
    fn validate<'a>(&'a self, summary: &'a QuerySummary) -> HandlerFuture<'a, Validation> {
        Box::pin(async move {
            let name: Option<String> = summary.parameter("League_Name")?;
            Ok(match name {
                Some(name) if !name.trim().is_empty() => Validation::Valid,
                _ => Validation::fatal("League name is required"),
            })
        })
    }

    fn required_projections(&self, summary: &QuerySummary) -> Result<Vec<ProjectionKey>, SagaError> {
        let name = Self::league_name(summary)?;
        Ok(vec![ProjectionKey::new(LeagueSummaryProjection::NAME, league_log(&name))])
    }

    fn collate(
        &self,
        _summary: &QuerySummary,
        projections: &ProcessedProjections,
    ) -> Result<serde_json::Value, SagaError> {
        let league: Option<LeagueSummary> = projections.get(LeagueSummaryProjection::NAME)?;
        match league {
            Some(league) if league.is_formed() => serde_json::to_value(league)
                .map_err(|e| SagaError::Projection(ProjectionError::Serialization(e.to_string()))),
            _ => Ok(serde_json::Value::Null),
        }
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// `create-league` saga over `store`, configured from `LEAGUE_COMMAND_*`.
#[must_use]
pub fn create_league_saga(
    store: Arc<dyn EventStore>,
    transports: TransportRegistry,
    clock: Arc<dyn Clock>,
) -> CommandSaga<CreateLeague> {
    let config = CommandSagaConfig::from_env("LEAGUE_COMMAND", DOMAIN, CREATE_LEAGUE);
    CommandSaga::new(config, CreateLeague, store, transports, clock)
}

/// `get-league-summary` saga over `store`, configured from `LEAGUE_QUERY_*`.
#[must_use]
pub fn league_summary_saga(
    store: Arc<dyn EventStore>,
    transports: TransportRegistry,
    clock: Arc<dyn Clock>,
) -> QuerySaga<GetLeagueSummary> {
    let config = QuerySagaConfig::from_env("LEAGUE_QUERY", DOMAIN, GET_LEAGUE_SUMMARY);
    QuerySaga::new(
        config,
        GetLeagueSummary,
        store,
        projection_registry(),
        transports,
        clock,
    )
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Panics: Tests fail loudly on unexpected errors
mod tests {
    use super::*;
    use sagaflow_core::projection::fold;

    fn formed(name: &str) -> SerializedEvent {
        let event = LeagueEvent::Formed {
            name: name.to_string(),
            location: "Springfield".to_string(),
            formed_at: DateTime::from_timestamp(1_735_689_600, 0).expect("valid timestamp"),
        };
        SerializedEvent::from_event(&event, None).expect("encodes")
    }

    #[test]
    fn summary_reflects_formed_event() {
        let snapshot = fold(&LeagueSummaryProjection, &[formed("Acme FC")]).expect("folds");

        assert!(snapshot.changed);
        assert_eq!(snapshot.state.name, "Acme FC");
        assert_eq!(snapshot.state.location, "Springfield");
        assert!(snapshot.state.is_formed());
    }

    #[test]
    fn forming_twice_stops_the_fold() {
        let result = fold(&LeagueSummaryProjection, &[formed("Acme FC"), formed("Acme FC")]);

        assert!(matches!(
            result,
            Err(ProjectionError::EventProcessing { position: 2, .. })
        ));
    }

    #[test]
    fn other_events_are_ignored() {
        let other = SerializedEvent::new("Team.Joined.v1".to_string(), vec![], None);
        let snapshot = fold(&LeagueSummaryProjection, &[other]).expect("folds");

        assert!(!snapshot.changed);
        assert_eq!(snapshot.sequence.value(), 1);
        assert_eq!(snapshot.state, LeagueSummary::default());
    }

    #[test]
    fn formed_event_is_effective_from_formation() {
        let stored = formed("Acme FC");
        assert_eq!(stored.event_type, LeagueEvent::FORMED);
        assert!(stored.as_of.is_some());
    }
}
