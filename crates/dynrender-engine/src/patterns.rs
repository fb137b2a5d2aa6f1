//! Console commands and the console lines that answer them.
//!
//! These are scraped from game-server output, so they change whenever the
//! plugin rewords a message. They are kept as data (overridable through the
//! `console_patterns` setting) rather than literals at the call sites.

/// Command templates and output patterns for one plugin/server version.
///
/// Placeholders: `{world}`, `{x}`, `{z}`, `{radius}`, `{player}`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ConsolePatterns {
    pub version: String,

    pub radius_render_command: String,
    pub cancel_render_command: String,
    pub entity_dimension_command: String,
    pub entity_position_command: String,

    pub render_started: String,
    pub render_already_active: String,
    pub render_finished: String,
    pub render_cancelled: String,
    pub entity_data: String,
    pub no_entity: String,
}

impl Default for ConsolePatterns {
    fn default() -> Self {
        Self {
            version: "dynmap-3".to_string(),
            radius_render_command: "dynmap radiusrender {world} {x} {z} {radius}".to_string(),
            cancel_render_command: "dynmap cancelrender {world}".to_string(),
            entity_dimension_command: "data get entity {player} Dimension".to_string(),
            entity_position_command: "data get entity {player} Pos".to_string(),
            render_started: "Render of {radius} block radius starting on world '{world}'..."
                .to_string(),
            render_already_active: "Radius render of world '{world}' already active.".to_string(),
            render_finished: "Radius render of '{world}' finished.".to_string(),
            render_cancelled: "Cancelled render for '{world}'".to_string(),
            entity_data: "{player} has the following entity data:".to_string(),
            no_entity: "No entity was found".to_string(),
        }
    }
}

fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

impl ConsolePatterns {
    pub fn radius_render(&self, world: &str, x: i64, z: i64, radius: i64) -> String {
        fill(
            &self.radius_render_command,
            &[
                ("world", world),
                ("x", &x.to_string()),
                ("z", &z.to_string()),
                ("radius", &radius.to_string()),
            ],
        )
    }

    pub fn cancel_render(&self, world: &str) -> String {
        fill(&self.cancel_render_command, &[("world", world)])
    }

    pub fn entity_dimension(&self, player: &str) -> String {
        fill(&self.entity_dimension_command, &[("player", player)])
    }

    pub fn entity_position(&self, player: &str) -> String {
        fill(&self.entity_position_command, &[("player", player)])
    }

    pub fn started(&self, world: &str, radius: i64) -> String {
        fill(
            &self.render_started,
            &[("world", world), ("radius", &radius.to_string())],
        )
    }

    pub fn already_active(&self, world: &str) -> String {
        fill(&self.render_already_active, &[("world", world)])
    }

    pub fn finished(&self, world: &str) -> String {
        fill(&self.render_finished, &[("world", world)])
    }

    pub fn cancelled(&self, world: &str) -> String {
        fill(&self.render_cancelled, &[("world", world)])
    }

    pub fn entity_data_for(&self, player: &str) -> String {
        fill(&self.entity_data, &[("player", player)])
    }

    pub fn no_entity_found(&self) -> String {
        self.no_entity.clone()
    }
}
