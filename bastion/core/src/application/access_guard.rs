// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Access Guard
//!
//! Fixed-order admission chain run before any handler:
//!
//! ```text
//! Authenticate ─► RateLimit ─► ValidateShape ─► handler(context, request)
//! ```
//!
//! The first stage that rejects ends the chain. Rate limiting is a fixed
//! window per `tenant:route`, so it can only run after authentication has
//! established the tenant.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::application::context_manager::SecurityContextManager;
use crate::domain::config::RateLimitConfig;
use crate::domain::guard::{GuardRejection, GuardStage, InboundRequest, RouteShape, StageOutcome};
use crate::domain::rate_limit::RateLimitBucket;
use crate::domain::security_context::{AuthError, SecurityContext, SessionProof};

/// Bucket key suffix for requests that matched no route.
const UNMATCHED_ROUTE: &str = "*unmatched";

/// A request that passed every stage, paired with its context.
#[derive(Debug)]
pub struct Admission {
    pub context: SecurityContext,
    pub request: InboundRequest,
    pub route: RouteShape,
}

struct Pending<'a> {
    request: &'a InboundRequest,
    route: Option<&'a RouteShape>,
    context: Option<SecurityContext>,
}

pub struct AccessGuard {
    contexts: Arc<SecurityContextManager>,
    routes: Vec<RouteShape>,
    buckets: DashMap<String, RateLimitBucket>,
    window: Duration,
    default_limit: u32,
    session_cookie: String,
}

impl AccessGuard {
    pub fn new(
        contexts: Arc<SecurityContextManager>,
        routes: Vec<RouteShape>,
        rate_limit: &RateLimitConfig,
        session_cookie: impl Into<String>,
    ) -> Self {
        Self {
            contexts,
            routes,
            buckets: DashMap::new(),
            window: Duration::seconds(rate_limit.window_secs as i64),
            default_limit: rate_limit.default_limit,
            session_cookie: session_cookie.into(),
        }
    }

    pub async fn admit(&self, request: InboundRequest) -> Result<Admission, GuardRejection> {
        self.admit_at(request, Utc::now()).await
    }

    pub async fn admit_at(&self, request: InboundRequest, now: DateTime<Utc>) -> Result<Admission, GuardRejection> {
        let route = self.routes.iter().find(|r| r.matches(request.method, &request.path));
        let mut pending = Pending {
            request: &request,
            route,
            context: None,
        };

        for stage in GuardStage::ORDER {
            if let StageOutcome::Reject(rejection) = self.run_stage(stage, &mut pending, now).await {
                metrics::counter!("bastion_guard_rejections_total", "stage" => stage.as_str()).increment(1);
                debug!(
                    stage = stage.as_str(),
                    method = %request.method,
                    path = %request.path,
                    "Request rejected: {}",
                    rejection
                );
                return Err(rejection);
            }
        }

        match (pending.context, pending.route.cloned()) {
            (Some(context), Some(route)) => Ok(Admission {
                context,
                request,
                route,
            }),
            _ => Err(GuardRejection::UnknownRoute {
                method: request.method,
                path: request.path.clone(),
            }),
        }
    }

    /// Drop buckets whose window has elapsed.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| now - bucket.window_start < self.window);
        before - self.buckets.len()
    }

    pub fn tracked_buckets(&self) -> usize {
        self.buckets.len()
    }

    async fn run_stage(&self, stage: GuardStage, pending: &mut Pending<'_>, now: DateTime<Utc>) -> StageOutcome {
        match stage {
            GuardStage::Authenticate => {
                let proof = SessionProof {
                    token: pending.request.session_token(&self.session_cookie),
                    claimed_tenant: pending.request.claimed_tenant(),
                };
                match self.contexts.build_at(&proof, now).await {
                    Ok(context) => {
                        pending.context = Some(context);
                        StageOutcome::Continue
                    }
                    Err(e) => StageOutcome::Reject(GuardRejection::Unauthenticated(e)),
                }
            }
            GuardStage::RateLimit => {
                let Some(context) = pending.context.as_ref() else {
                    return StageOutcome::Reject(GuardRejection::Unauthenticated(AuthError::Unauthorized(
                        "no security context".to_string(),
                    )));
                };
                let (route_key, limit) = match pending.route {
                    Some(route) => (route.path.as_str(), route.rate_limit.unwrap_or(self.default_limit)),
                    None => (UNMATCHED_ROUTE, self.default_limit),
                };
                self.check_rate(&format!("{}:{}", context.tenant_id(), route_key), limit, now)
            }
            GuardStage::ValidateShape => match pending.route {
                Some(route) => match route.validate(pending.request) {
                    Ok(()) => StageOutcome::Continue,
                    Err(rejection) => StageOutcome::Reject(rejection),
                },
                None => StageOutcome::Reject(GuardRejection::UnknownRoute {
                    method: pending.request.method,
                    path: pending.request.path.clone(),
                }),
            },
        }
    }

    fn check_rate(&self, key: &str, limit: u32, now: DateTime<Utc>) -> StageOutcome {
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| RateLimitBucket::new(key, limit, now));
        bucket.limit = limit;
        if bucket.try_acquire(now, self.window) {
            return StageOutcome::Continue;
        }
        let wait = bucket.retry_after(now, self.window);
        // round up so clients never retry inside the same window
        let retry_after_secs = (wait.num_milliseconds().max(0) as u64).div_ceil(1000).max(1);
        StageOutcome::Reject(GuardRejection::RateLimited { retry_after_secs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::outbound::HttpMethod;
    use crate::domain::security_context::SessionClaims;
    use crate::domain::tenant::{SessionId, TenantId};
    use crate::infrastructure::audit::SecurityAuditLogger;
    use crate::infrastructure::session_activity::InMemorySessionActivityRepository;
    use crate::infrastructure::session_token::{JwtSessionIssuer, JwtSessionVerifier};
    use serde_json::json;

    const SECRET: &[u8] = b"guard-test-secret-at-least-32-bytes!";

    fn guard(limit: u32) -> AccessGuard {
        let verifier = JwtSessionVerifier::hs256(SECRET, "bastion-auth", &["bastion-api"]).unwrap();
        let contexts = SecurityContextManager::new(
            Arc::new(verifier),
            Arc::new(InMemorySessionActivityRepository::new()),
            Arc::new(SecurityAuditLogger::new()),
        );
        AccessGuard::new(
            Arc::new(contexts),
            crate::domain::config::default_routes(),
            &RateLimitConfig {
                window_secs: 60,
                default_limit: limit,
            },
            "bastion_session",
        )
    }

    fn token(tenant_id: TenantId) -> String {
        let now = Utc::now();
        JwtSessionIssuer::hs256(SECRET, "bastion-auth", "bastion-api")
            .issue(&SessionClaims {
                subject: "user-1".to_string(),
                tenant_id,
                session_id: SessionId::new(),
                issued_at: now,
                expires_at: now + Duration::minutes(10),
                capabilities: vec!["ledger.*".into()],
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_admits_valid_request() {
        let guard = guard(10);
        let tenant = TenantId::new();
        let request = InboundRequest::new(HttpMethod::Post, "/v1/accounts")
            .with_header("Authorization", format!("Bearer {}", token(tenant)))
            .with_json(&json!({"name": "Ops", "currency": "USD"}));

        let admission = guard.admit(request).await.unwrap();
        assert_eq!(admission.context.tenant_id(), tenant);
        assert_eq!(admission.route.path, "/v1/accounts");
    }

    #[tokio::test]
    async fn test_authentication_runs_before_shape_validation() {
        let guard = guard(10);
        // unknown route and no token: authentication must reject first
        let result = guard.admit(InboundRequest::new(HttpMethod::Get, "/nope")).await;
        match result {
            Err(GuardRejection::Unauthenticated(AuthError::Unauthorized(_))) => {}
            other => panic!("expected Unauthenticated, got {:?}", other),
        }
        assert_eq!(guard.tracked_buckets(), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_runs_before_shape_validation() {
        let guard = guard(1);
        let bearer = format!("Bearer {}", token(TenantId::new()));
        let bad_shape = || {
            InboundRequest::new(HttpMethod::Post, "/v1/accounts")
                .with_header("Authorization", bearer.clone())
                .with_json(&json!({"name": "only"}))
        };

        assert!(matches!(guard.admit(bad_shape()).await, Err(GuardRejection::InvalidShape(_))));
        match guard.admit(bad_shape()).await {
            Err(GuardRejection::RateLimited { retry_after_secs }) => assert!(retry_after_secs >= 1),
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_is_per_tenant() {
        let guard = guard(1);
        for _ in 0..2 {
            let request = InboundRequest::new(HttpMethod::Get, "/v1/accounts")
                .with_header("Authorization", format!("Bearer {}", token(TenantId::new())));
            assert!(guard.admit(request).await.is_ok());
        }
        assert_eq!(guard.tracked_buckets(), 2);
        assert_eq!(guard.prune_expired(Utc::now() + Duration::seconds(61)), 2);
    }

    #[tokio::test]
    async fn test_window_resets() {
        let guard = guard(1);
        let bearer = format!("Bearer {}", token(TenantId::new()));
        let request = || InboundRequest::new(HttpMethod::Get, "/v1/accounts").with_header("Authorization", bearer.clone());
        let t0 = Utc::now();

        assert!(guard.admit_at(request(), t0).await.is_ok());
        assert!(guard.admit_at(request(), t0 + Duration::seconds(1)).await.is_err());
        assert!(guard.admit_at(request(), t0 + Duration::seconds(60)).await.is_ok());
    }

    #[tokio::test]
    async fn test_claimed_tenant_mismatch_rejected() {
        let guard = guard(10);
        let request = InboundRequest::new(HttpMethod::Get, "/v1/accounts")
            .with_header("Authorization", format!("Bearer {}", token(TenantId::new())))
            .with_header("X-Tenant-Id", TenantId::new().to_string());
        assert!(matches!(
            guard.admit(request).await,
            Err(GuardRejection::Unauthenticated(AuthError::Unauthorized(_)))
        ));
    }
}
