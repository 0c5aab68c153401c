//! Records returned by the public JokeAPI, used by the CLI demos.

use serde::{Deserialize, Serialize};

use crate::schema::{FieldDef, Schema, SchemaDefinition};

pub const JOKE_API_URL: &str = "https://v2.jokeapi.dev/joke/Any";

/// Content flags attached to a joke
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Flags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub nsfw: bool,
    pub religious: bool,
    pub political: bool,
    pub racist: bool,
    pub sexist: bool,
    pub explicit: bool,
}

impl Schema for Flags {
    fn definition() -> SchemaDefinition {
        SchemaDefinition::new("Flags")
            .field(FieldDef::boolean("nsfw"))
            .field(FieldDef::boolean("religious"))
            .field(FieldDef::boolean("political"))
            .field(FieldDef::boolean("racist"))
            .field(FieldDef::boolean("sexist"))
            .field(FieldDef::boolean("explicit"))
    }
}

/// A single or two-part joke.
///
/// `id` is the storage identity once loaded; on records fetched from the API
/// it carries the API's own joke number and is ignored when saving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Joke {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub error: bool,
    pub category: String,
    #[serde(rename = "type")]
    pub joke_type: String,
    #[serde(default)]
    pub joke: Option<String>,
    #[serde(default)]
    pub setup: Option<String>,
    #[serde(default)]
    pub delivery: Option<String>,
    pub flags: Flags,
    pub safe: bool,
    pub lang: String,
}

impl Joke {
    /// Joke text, joining setup and delivery for two-part jokes
    pub fn text(&self) -> String {
        match (&self.joke, &self.setup, &self.delivery) {
            (Some(joke), _, _) => joke.clone(),
            (None, Some(setup), Some(delivery)) => format!("{}\n{}", setup, delivery),
            (None, Some(setup), None) => setup.clone(),
            _ => String::new(),
        }
    }
}

impl Schema for Joke {
    fn definition() -> SchemaDefinition {
        SchemaDefinition::new("Joke")
            .field(FieldDef::integer("id").optional())
            .field(FieldDef::boolean("error"))
            .field(FieldDef::text("category"))
            .field(FieldDef::text("type"))
            .field(FieldDef::text("joke").optional())
            .field(FieldDef::text("setup").optional())
            .field(FieldDef::text("delivery").optional())
            .field(FieldDef::reference("flags", Flags::definition))
            .field(FieldDef::boolean("safe"))
            .field(FieldDef::text("lang"))
    }
}
