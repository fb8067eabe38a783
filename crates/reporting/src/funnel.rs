//! Funnel definitions and step-wise conversion analysis.
//!
//! Each step is counted independently over the date window: the number of
//! events carrying the step's event name. There is no per-user sequencing, so
//! a later step can outnumber an earlier one and drop-off goes negative.

use crate::deadline::{within, DEFAULT_QUERY_TIMEOUT};
use crate::window::DateRange;
use chrono::Utc;
use pulse_core::types::{Funnel, FunnelResult, FunnelStep, FunnelStepResult, NewFunnel};
use pulse_core::{EventStore, PulseError, PulseResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;


/// Create, fetch, update and list funnel definitions.
pub struct FunnelRegistry {
    store: Arc<dyn EventStore>,
}

impl FunnelRegistry {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, definition: NewFunnel) -> PulseResult<Funnel> {
        validate(&definition)?;

        let now = Utc::now();
        let funnel = Funnel {
            id: Uuid::new_v4().to_string(),
            name: definition.name,
            description: definition.description,
            steps: definition.steps,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_funnel(&funnel).await?;

        info!(funnel_id = %funnel.id, name = %funnel.name, steps = funnel.steps.len(), "Funnel created");
        Ok(funnel)
    }

    pub async fn get(&self, id: &str) -> PulseResult<Funnel> {
        self.store
            .find_funnel(id)
            .await?
            .ok_or_else(|| PulseError::not_found("funnel", id))
    }

    /// Replace name, description and steps. `created_at` is kept.
    pub async fn update(&self, id: &str, definition: NewFunnel) -> PulseResult<Funnel> {
        validate(&definition)?;

        let existing = self.get(id).await?;
        let funnel = Funnel {
            id: existing.id,
            name: definition.name,
            description: definition.description,
            steps: definition.steps,
            created_at: existing.created_at,
            updated_at: Utc::now().max(existing.updated_at),
        };

        if !self.store.update_funnel(&funnel).await? {
            return Err(PulseError::not_found("funnel", id));
        }
        info!(funnel_id = %funnel.id, "Funnel updated");
        Ok(funnel)
    }

    /// Newest first.
    pub async fn list(&self) -> PulseResult<Vec<Funnel>> {
        self.store.list_funnels().await
    }
}

fn validate(definition: &NewFunnel) -> PulseResult<()> {
    if definition.name.trim().is_empty() {
        return Err(PulseError::invalid("name is required"));
    }
    Ok(())
}

pub struct FunnelAnalyzer {
    store: Arc<dyn EventStore>,
    query_timeout: Duration,
}

impl FunnelAnalyzer {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Analyze a stored funnel. Malformed dates fall back to the default window.
    pub async fn analyze(
        &self,
        funnel_id: &str,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> PulseResult<FunnelResult> {
        let funnel = self
            .store
            .find_funnel(funnel_id)
            .await?
            .ok_or_else(|| PulseError::not_found("funnel", funnel_id))?;
        let range = DateRange::parse_lenient(start_date, end_date, Utc::now());
        self.analyze_funnel(&funnel, &range).await
    }

    pub async fn analyze_funnel(
        &self,
        funnel: &Funnel,
        range: &DateRange,
    ) -> PulseResult<FunnelResult> {
        let steps = ordered_steps(&funnel.steps);
        let window = range.filter();

        // One deadline covers every step query.
        let counts = within(self.query_timeout, "funnel_step_counts", async {
            let mut counts = Vec::with_capacity(steps.len());
            for step in &steps {
                counts.push(
                    self.store
                        .count_where(&window.clone().named(&step.event_name))
                        .await?,
                );
            }
            Ok::<_, PulseError>(counts)
        })
        .await?;

        let result = build_result(funnel, &steps, &counts, range.label());

        metrics::counter!("funnel.analyzed").increment(1);
        debug!(
            funnel_id = %funnel.id,
            steps = steps.len(),
            conversion_rate = result.conversion_rate,
            "Funnel analyzed"
        );
        Ok(result)
    }
}

/// Ascending by `order`; ties keep their given position.
fn ordered_steps(steps: &[FunnelStep]) -> Vec<FunnelStep> {
    let mut ordered = steps.to_vec();
    ordered.sort_by_key(|step| step.order);
    ordered
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Fold per-step counts into a result. `counts` lines up with `steps`.
fn build_result(
    funnel: &Funnel,
    steps: &[FunnelStep],
    counts: &[u64],
    date_range: String,
) -> FunnelResult {
    let mut step_results = Vec::with_capacity(steps.len());
    let mut drop_offs = HashMap::new();
    let mut previous: Option<u64> = None;

    for (step, &users) in steps.iter().zip(counts) {
        let (completion_rate, drop_off) = match previous {
            None => (100.0, 0),
            Some(prev) => {
                let drop_off = prev as i64 - users as i64;
                drop_offs.insert(step.step_name.clone(), drop_off);
                (percent(users, prev), drop_off)
            }
        };
        step_results.push(FunnelStepResult {
            step_name: step.step_name.clone(),
            event_name: step.event_name.clone(),
            users,
            completion_rate,
            drop_off,
        });
        previous = Some(users);
    }

    let conversion_rate = match (counts.first(), counts.last()) {
        (Some(&first), Some(&last)) => percent(last, first),
        _ => 0.0,
    };

    FunnelResult {
        funnel_id: funnel.id.clone(),
        funnel_name: funnel.name.clone(),
        date_range,
        step_results,
        conversion_rate,
        drop_offs,
    }
}
