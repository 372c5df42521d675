// Copyright 2025 jonefeewang@gmail.com
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


//! Pooled I/O resources.
//!
//! The server never allocates receive or send buffers per operation. At
//! startup a [`BufferManager`] reserves one contiguous region and carves it into
//! fixed-size slots, one per [`IoContext`]. Contexts then cycle between a
//! [`ContextPool`] and the operation currently using them.

pub use buffer_manager::BufferManager;
pub use context_pool::ContextPool;
pub use io_context::{IoContext, ReadContext, WriteContext};

mod buffer_manager;
mod context_pool;
mod io_context;
