use serde::Deserialize;
use serde_json::{json, Value};

/// Raw shape of an inbound Discord interaction webhook. Only the fields the
/// bot acts on are decoded; everything else in the payload is ignored.
#[derive(Debug, Deserialize)]
pub struct InteractionPayload {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub member: Option<GuildMember>,
    #[serde(default)]
    pub user: Option<PartialUser>,
    #[serde(default)]
    pub data: Option<InteractionData>,
}

#[derive(Debug, Deserialize)]
pub struct GuildMember {
    #[serde(default)]
    pub user: Option<PartialUser>,
}

#[derive(Debug, Deserialize)]
pub struct PartialUser {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct InteractionData {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub custom_id: Option<String>,
    #[serde(default)]
    pub options: Vec<CommandOption>,
}

#[derive(Debug, Deserialize)]
pub struct CommandOption {
    pub name: String,
    pub value: Value,
}

/// Interaction kinds the bot reacts to, decoded once at the HTTP boundary.
/// Required fields stay `Option` here; the handlers turn absences into
/// user-facing rejections instead of crashes.
#[derive(Debug)]
pub enum Interaction {
    Ping,
    Command {
        name: String,
        guild_id: Option<String>,
        channel_id: Option<String>,
        options: Vec<CommandOption>,
    },
    Component {
        custom_id: String,
        guild_id: Option<String>,
        channel_id: Option<String>,
        user_id: Option<String>,
    },
    ModalSubmit {
        custom_id: Option<String>,
    },
    Unknown(u8),
}

impl InteractionPayload {
    /// Discord interaction types: 1 ping, 2 application command,
    /// 3 message component, 5 modal submit.
    pub fn classify(self) -> Interaction {
        let user_id = self.acting_user_id();
        match self.kind {
            1 => Interaction::Ping,
            2 => match self.data.as_ref().and_then(|d| d.name.clone()) {
                Some(name) => Interaction::Command {
                    name,
                    guild_id: self.guild_id,
                    channel_id: self.channel_id,
                    options: self.data.map(|d| d.options).unwrap_or_default(),
                },
                None => Interaction::Unknown(2),
            },
            3 => match self.data.as_ref().and_then(|d| d.custom_id.clone()) {
                Some(custom_id) => Interaction::Component {
                    custom_id,
                    guild_id: self.guild_id,
                    channel_id: self.channel_id,
                    user_id,
                },
                None => Interaction::Unknown(3),
            },
            5 => Interaction::ModalSubmit {
                custom_id: self.data.and_then(|d| d.custom_id),
            },
            other => Interaction::Unknown(other),
        }
    }

    // In a guild the acting user arrives under `member.user`; in DMs it is
    // the top-level `user`.
    fn acting_user_id(&self) -> Option<String> {
        self.member
            .as_ref()
            .and_then(|m| m.user.as_ref())
            .or(self.user.as_ref())
            .map(|u| u.id.clone())
    }
}

/// Response to Discord's webhook liveness ping.
pub fn pong() -> Value {
    json!({ "type": 1 })
}

/// Immediate channel-message response only the acting user can see.
pub fn ephemeral_reply(text: &str) -> Value {
    json!({
        "type": 4,
        "data": {
            "content": text,
            "flags": 64,
        }
    })
}
