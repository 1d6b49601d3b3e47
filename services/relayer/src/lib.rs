// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The SEDA relayer service library: wires the chain ports, the transaction
//! queue, the batch fetcher, the request manager and the batch relayer into
//! one set of cooperating background tasks.

#![warn(missing_docs)]

/// Background service wiring.
pub mod service;

/// The crate-wide result type.
pub use seda_relayer_utils::Result;
