//! Liveness reporting for the long-running loops of a service.
//!
//! Each loop registers a component with a deadline and must report healthy
//! more often than that deadline. The process is healthy only when every
//! registered component is healthy and none has gone past its deadline. A
//! registry with no components is unhealthy, so the probe fails until the
//! loops have actually started.
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::ops::Add;
use std::sync::{Arc, RwLock};

use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

#[derive(Default, Debug)]
pub struct HealthStatus {
    /// True when all components are healthy
    pub healthy: bool,
    /// Current status of each registered component, for display
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{:?}", self);
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Set on registration, until the first report
    Starting,
    /// Healthy until the given instant
    HealthyUntil(OffsetDateTime),
    /// Reported unhealthy
    Unhealthy,
    /// The HealthyUntil deadline passed without a new report
    Stalled,
}

type Components = Arc<RwLock<HashMap<String, ComponentStatus>>>;

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Components,
}

impl HealthHandle {
    /// Report healthy for the next `deadline`.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc().add(self.deadline),
        ))
    }

    pub fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut map) => {
                _ = map.insert(self.component.clone(), status);
            }
            // The probe will keep failing and the process gets restarted
            Err(_) => warn!("poisoned HealthRegistry lock"),
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Components,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    /// Register a component; hand the returned handle to the loop it tracks.
    pub fn register(&self, component: String, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component,
            deadline,
            components: self.components.clone(),
        };
        handle.report_status(ComponentStatus::Starting);
        handle
    }

    /// The overall status, usable directly as an axum handler result.
    pub fn get_status(&self) -> HealthStatus {
        let now = OffsetDateTime::now_utc();
        let mut result = HealthStatus::default();

        match self.components.read() {
            Ok(components) => {
                result.healthy = !components.is_empty();
                for (name, status) in components.iter() {
                    let effective = match status {
                        ComponentStatus::HealthyUntil(until) if *until > now => status.clone(),
                        ComponentStatus::HealthyUntil(_) => ComponentStatus::Stalled,
                        other => other.clone(),
                    };
                    if !matches!(effective, ComponentStatus::HealthyUntil(_)) {
                        result.healthy = false;
                    }
                    _ = result.components.insert(name.clone(), effective);
                }
            }
            Err(_) => warn!("poisoned HealthRegistry lock"),
        }

        match result.healthy {
            true => info!("{} health check ok", self.name),
            false => warn!("{} health check failed: {:?}", self.name, result.components),
        }
        result
    }
}
