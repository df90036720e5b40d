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

//! # Dispatcher
//!
//! Turns due rows into handler invocations. Any number of nodes may poll the
//! same store; the version-checked lease is the only coordination between
//! them.

pub mod controller;
pub mod work_distributor;

pub use controller::{DispatchController, DispatchSettings, DispatchSummary};
pub use work_distributor::{PollDistributor, WorkDistributor};
