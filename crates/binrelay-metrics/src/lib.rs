// Copyright 2025 binrelay Authors
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

//! Request counters for the binrelay proxy.
//!
//! Each proxy gets a [`ProxyMetrics`] handle with lock-free counters that
//! the client connections bump on the hot path; [`MetricsRegistry`] hands
//! out the handles and produces a serialisable [`MetricsSnapshot`] for the
//! metrics HTTP endpoint.

mod registry;
mod snapshot;

pub use registry::{MetricsRegistry, ProxyMetrics};
pub use snapshot::{MetricsSnapshot, ProxyStats};
