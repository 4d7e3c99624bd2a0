// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::ControllerError;
use dpm_config::ScheduleSpec;
use std::collections::HashSet;

/// Resolves which components the power manager drives.
///
/// - An explicit list is used verbatim, in its own order.
/// - Otherwise every sibling except the controller itself is managed, in sibling order.
/// - A schedule further restricts the result to the components it lists.
///
/// A name appearing twice would alias two register slots and is rejected.
pub fn resolve_components(
    siblings: &[String],
    controller: &str,
    explicit: Option<&[String]>,
    schedule: Option<&ScheduleSpec>,
) -> Result<Vec<String>, ControllerError> {
    let mut names: Vec<String> = match explicit {
        Some(list) => list.to_vec(),
        None => siblings
            .iter()
            .filter(|name| name.as_str() != controller)
            .cloned()
            .collect(),
    };

    let mut seen = HashSet::new();
    for name in &names {
        if !seen.insert(name.as_str()) {
            return Err(ControllerError::DuplicateComponent(name.clone()));
        }
    }

    if let Some(schedule) = schedule {
        names.retain(|name| schedule.contains(name));
    }

    tracing::info!("detected components: {:?}", names);
    Ok(names)
}
