// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Authentication and authorization of ingoing calls.
//!
//! [`AuthInterceptor`] runs before the request is parsed. It validates the bearer, checks
//! the principal's role against the call's allowed roles and the token's scopes against the
//! call's required scope, then stores the token on the call context. Every rejection reaches
//! the caller as 401; the log line names the actual reason.

use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calls::CallInfo;
use crate::config::Config;
use crate::context::{BearerToken, IngoingCall, SignedIntent};
use crate::error::{AuthError, RpcError};
use crate::roles::{Role, Roles, SecurityPrincipal, SecurityPrincipalToken, SecurityScope};
use crate::server::IngoingCallFilter;

/// Turns a raw bearer into a validated token.
#[async_trait]
pub trait TokenValidation: Send + Sync {
    async fn validate(&self, token: &str) -> Result<SecurityPrincipalToken, AuthError>;
}

/// The `aud` claim: a single scope or a list of scopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Default for Audience {
    fn default() -> Self {
        Audience::Many(Vec::new())
    }
}

impl Audience {
    pub fn entries(&self) -> &[String] {
        match self {
            Audience::One(one) => std::slice::from_ref(one),
            Audience::Many(many) => many,
        }
    }
}

/// Claims carried by a UCloud access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    pub sub: String,
    pub role: Role,
    #[serde(default)]
    pub aud: Audience,
    #[serde(default)]
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_session_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_by: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extended_by_chain: Vec<String>,
}

impl TokenClaims {
    /// Sign the claims with HS512.
    pub fn sign(&self, secret: &[u8]) -> Result<String, jsonwebtoken::errors::Error> {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS512),
            self,
            &EncodingKey::from_secret(secret),
        )
    }

    fn into_token(self) -> SecurityPrincipalToken {
        let scopes = self
            .aud
            .entries()
            .iter()
            .filter_map(|entry| match entry.parse::<SecurityScope>() {
                Ok(scope) => Some(scope),
                Err(e) => {
                    debug!(scope = %entry, error = %e, "Ignoring unparseable token scope");
                    None
                }
            })
            .collect();

        SecurityPrincipalToken {
            principal: SecurityPrincipal {
                username: self.sub,
                role: self.role,
                principal_type: self.principal_type,
            },
            scopes,
            issued_at: self.iat,
            expires_at: self.exp,
            public_session_reference: self.public_session_reference,
            extended_by: self.extended_by,
            extended_by_chain: self.extended_by_chain,
        }
    }
}

/// HS512 JWT validation with a shared secret.
pub struct JwtTokenValidation {
    key: DecodingKey,
    validation: Validation,
}

impl JwtTokenValidation {
    pub fn hs512(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS512);
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

#[async_trait]
impl TokenValidation for JwtTokenValidation {
    async fn validate(&self, token: &str) -> Result<SecurityPrincipalToken, AuthError> {
        let data = jsonwebtoken::decode::<TokenClaims>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Ok(data.claims.into_token())
    }
}

/// Authenticates and authorizes every call before its request is parsed.
pub struct AuthInterceptor {
    validator: Arc<dyn TokenValidation>,
    provider_validator: Arc<dyn TokenValidation>,
    development_mode: bool,
}

impl AuthInterceptor {
    pub fn new(validator: Arc<dyn TokenValidation>, provider_validator: Arc<dyn TokenValidation>) -> Self {
        Self {
            validator,
            provider_validator,
            development_mode: false,
        }
    }

    /// JWT validators for user and provider tokens, as configured.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(JwtTokenValidation::hs512(config.token_secret.as_bytes())),
            Arc::new(JwtTokenValidation::hs512(config.provider_token_secret.as_bytes())),
        )
        .development_mode(config.development_mode)
    }

    /// Let privileged principals make provider calls.
    pub fn development_mode(mut self, enabled: bool) -> Self {
        self.development_mode = enabled;
        self
    }

    /// Check that the caller may make `call`, storing the validated token on success.
    pub async fn authorize(&self, ctx: &mut IngoingCall, call: &CallInfo) -> Result<(), AuthError> {
        let validator = if call.is_provider_call() {
            &self.provider_validator
        } else {
            &self.validator
        };
        let allows_guest = call.roles.contains(Role::Guest);

        let Some(bearer) = ctx.raw_bearer().map(str::to_string) else {
            return if allows_guest {
                Ok(())
            } else {
                Err(AuthError::MissingToken)
            };
        };

        let token = match validator.validate(&bearer).await {
            Ok(token) => token,
            Err(e) if allows_guest => {
                debug!(error = %e, "Invalid token on public call, continuing as guest");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let role = token.principal.role;
        if !call.roles.contains(role) && !self.development_escape(call, role) {
            return Err(AuthError::RoleMismatch {
                role: role.to_string(),
                call: call.full_name.clone(),
            });
        }

        if !token.covers(&call.required_scope) {
            return Err(AuthError::MissingScope {
                required: call.required_scope.to_string(),
            });
        }

        ctx.attributes_mut().insert(BearerToken(bearer));
        ctx.attributes_mut().insert(token);
        Ok(())
    }

    fn development_escape(&self, call: &CallInfo, role: Role) -> bool {
        self.development_mode && call.roles.contains(Role::Provider) && Roles::PRIVILEGED.contains(role)
    }
}

#[async_trait]
impl IngoingCallFilter for AuthInterceptor {
    async fn before_parsing(&self, ctx: &mut IngoingCall, call: &CallInfo) -> Result<(), RpcError> {
        self.authorize(ctx, call).await.map_err(|e| {
            debug!(reason = e.kind(), error = %e, "Rejected call");
            RpcError::from(e)
        })
    }
}

/// Copies a presented signed intent onto the call context.
#[derive(Debug, Default)]
pub struct SignedIntentFilter;

#[async_trait]
impl IngoingCallFilter for SignedIntentFilter {
    async fn before_parsing(&self, ctx: &mut IngoingCall, _call: &CallInfo) -> Result<(), RpcError> {
        if let Some(intent) = ctx.raw_signed_intent().map(str::to_string) {
            ctx.attributes_mut().insert(SignedIntent(intent));
        }
        Ok(())
    }
}
