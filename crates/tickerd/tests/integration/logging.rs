/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

use serial_test::serial;

#[test]
#[serial]
fn test_init_logging_is_idempotent() {
    tickerd::init_logging(Some("debug"));
    tickerd::init_logging(None);
    tracing::info!("logging initialized twice without panicking");
}

#[test]
#[serial]
fn test_init_logging_honours_rust_log() {
    std::env::set_var("RUST_LOG", "tickerd=trace");
    tickerd::init_logging(None);
    std::env::remove_var("RUST_LOG");
}
