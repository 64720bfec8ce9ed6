// Copyright 2022 ComposableFi
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use log::LevelFilter;

/// Log target of every relayer progress line.
pub const LOG_TARGET: &str = "ibc-link";

/// Safe to call more than once, later calls are no-ops.
pub fn setup_logging() {
    let _ = env_logger::builder()
        .filter_module(LOG_TARGET, LevelFilter::Info)
        .format_module_path(false)
        .parse_default_env()
        .try_init();
}
