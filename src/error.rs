// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types for endpoint resolution

use thiserror::Error;

/// Errors raised while resolving a host specification into an endpoint.
///
/// All variants are fatal and raised synchronously during resolution;
/// none of them is retried internally.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The same field was given both in `user@host:port` shorthand and as
    /// an explicit argument. Ambiguity is an error, not a default.
    #[error("you supplied the {field} via both shorthand and argument; pick one")]
    AmbiguousField { field: &'static str },

    /// A port component failed to parse as a 1-65535 integer.
    #[error("invalid port '{value}' in host specification '{input}'")]
    InvalidPort { input: String, value: String },

    /// The host component was empty after shorthand extraction.
    #[error("empty host in specification '{input}'")]
    EmptyHost { input: String },

    /// A gateway chain revisited a host it already passed through.
    #[error("gateway chain for '{host}' loops back through '{via}'")]
    GatewayCycle { host: String, via: String },
}
