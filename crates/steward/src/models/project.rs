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

use serde::{Deserialize, Serialize};

use crate::database::universal_types::UniversalUuid;

/// Minimal project metadata handed to agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub id: UniversalUuid,
    pub name: String,
    pub status: String,
    /// `owner/name` of the linked repository, if an integration exists.
    pub repository: Option<String>,
}

impl ProjectSnapshot {
    pub fn has_repository(&self) -> bool {
        self.repository.is_some()
    }
}

/// Upsert payload for a project row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProject {
    pub id: UniversalUuid,
    pub name: String,
    pub status: String,
    pub repository: Option<String>,
}

/// Internally created work in a lookback window, used as a duplicate-work
/// signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityCounts {
    pub suggestions: u32,
    pub tasks: u32,
}
