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

// Expensive measurements served from background caches

pub mod cache;
pub mod cuda_driver;
pub mod shared_memory;
pub mod transfer_speed;

pub use cache::{ProbeCache, ProbeValue};
pub use shared_memory::{SharedGpuMemory, SharedGpuMemoryInfo};
pub use transfer_speed::{
    TransferBackend, TransferBenchmark, TransferSpeedConfig, TransferSpeedInfo, TransferSpeeds,
};
