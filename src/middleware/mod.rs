//! Axum surface of the gateway.
//!
//! Mounts the login flow under `<auth_path>` (default `/auth`) and the
//! authenticated backend proxy under `/api`.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use console_gateway::middleware::{GatewayConfig, gateway_routes};
//!
//! let config = GatewayConfig::from_env()?;
//! let app = axum::Router::new().merge(gateway_routes(config)?);
//! ```
//!
//! | Route | |
//! |---|---|
//! | `GET <auth_path>/authorize?redirect=<uri>` | start a login |
//! | `GET <auth_path>/code` | OAuth callback |
//! | `GET\|POST <auth_path>/logout` | drop the session |
//! | `POST <auth_path>/refresh` | renew the access token |
//! | `GET <auth_path>/session` | `{authenticated, expired, expiresAt}` |
//! | `ANY /api/*` | proxied to the backend with a bearer token |

mod config;
mod error;
mod extractor;
mod routes;
mod state;

pub use config::GatewayConfig;
pub use error::AuthError;
pub use routes::gateway_routes;
