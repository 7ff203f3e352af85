// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::OnceCell;

/// Scope of the token used to push custom metrics to Azure Monitor.
pub const AZURE_MONITORING_SCOPE: &str = "https://monitoring.azure.com//.default";

/// Asks the host for a token for the given scope. `None` when no credential
/// is available.
pub type TokenResolverFn =
    Arc<dyn Fn(&str) -> Pin<Box<dyn Future<Output = Option<String>> + Send>> + Send + Sync>;

/// Bearer token for the Azure Monitor custom metrics endpoint.
///
/// Credential acquisition lives outside this crate. A resolver is called at
/// most once per factory and its answer is kept, including `None`, so one
/// invocation never asks twice.
#[derive(Clone)]
pub enum TokenFactory {
    Fixed(String),
    Resolver {
        resolve: TokenResolverFn,
        cached: Arc<OnceCell<Option<String>>>,
    },
}

impl TokenFactory {
    #[must_use]
    pub fn fixed(token: &str) -> Self {
        Self::Fixed(token.to_string())
    }

    #[must_use]
    pub fn with_resolver(resolve: TokenResolverFn) -> Self {
        Self::Resolver {
            resolve,
            cached: Arc::new(OnceCell::new()),
        }
    }

    /// Fixed token taken from the environment variable `name`, if set and not
    /// blank.
    #[must_use]
    pub fn from_env_var(name: &str) -> Option<Self> {
        env::var(name)
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .map(Self::Fixed)
    }

    pub async fn bearer_token(&self) -> Option<&str> {
        match self {
            Self::Fixed(token) => Some(token),
            Self::Resolver { resolve, cached } => cached
                .get_or_init(|| resolve(AZURE_MONITORING_SCOPE))
                .await
                .as_deref(),
        }
    }
}

impl fmt::Debug for TokenFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(_) => f.write_str("TokenFactory::Fixed(..)"),
            Self::Resolver { cached, .. } => f
                .debug_struct("TokenFactory::Resolver")
                .field("resolved", &cached.initialized())
                .finish(),
        }
    }
}
