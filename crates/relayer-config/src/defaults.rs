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

//! Default values for the optional knobs, used by serde.

/// Messages per source-chain transaction.
pub const fn max_per_tx() -> usize {
    10
}

/// Flush a partial queue group after 5 seconds.
pub const fn flush_interval_ms() -> u64 {
    5_000
}

/// Queue timer tick every 500 ms.
pub const fn tick_interval_ms() -> u64 {
    500
}

/// Poll for a new batch every 5 seconds.
pub const fn batch_poll_interval_ms() -> u64 {
    5_000
}

/// Poll watched requests every 3 seconds.
pub const fn result_poll_interval_ms() -> u64 {
    3_000
}

/// Give up awaiting a result after 5 minutes.
pub const fn await_result_timeout_secs() -> u64 {
    300
}
