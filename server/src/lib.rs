//
// Copyright 2025-2026 Hans W. Uhlig. All Rights Reserved.
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
//

//! Realmkeep character persistence engine
//!
//! Loads characters from a character store and an account store, validates
//! and repairs them on the way in, tracks every record's lifecycle while the
//! character is online, and writes changes back as two independently
//! committed transaction scopes.

pub mod character;
pub mod config;
pub mod deletion;
pub mod error;
pub mod loader;
pub mod persistence;
pub mod position;
pub mod reference;
pub mod registry;
pub mod save;
pub mod session;
pub mod world;
