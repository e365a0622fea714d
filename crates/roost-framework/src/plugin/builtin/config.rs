//! Built-in `config` plugin.
//!
//! Loaded in every config room.  Members reconfigure the linked interaction
//! rooms with `<prefix>config <subcommand> [--room <room_id>]`:
//!
//! | Subcommand | Effect |
//! |------------|--------|
//! | `rooms` | list the rooms configured from here |
//! | `plugins` | loaded and available plugins |
//! | `activate <plugin>` / `remove <plugin>` | plugin management |
//! | `grant <user> <role>` / `revoke <user> <role>` / `clear <user>` | per-user roles |
//! | `grant-level <level> <role>` / `revoke-level <level> <role>` | power-level roles |
//! | `acl` | show the ACL |
//! | `plugin <name> [args...]` | forward to a plugin's own config parser |
//! | `reinvite` | not supported |
//!
//! Every subcommand that acts on a room requires the `config` role there.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Arg, ArgMatches, Command, value_parser};
use roost_core::{CONFIG_ROLE, TextMessage};
use tracing::{debug, info};

use crate::command::parse_args;
use crate::error::{BoxError, FrameworkError};
use crate::plugin::{Plugin, PluginApi, PluginDescriptor, PluginType};
use crate::room::Room;
use crate::tracker::RoomTracker;

/// Name of the built-in config plugin.
pub const CONFIG_PLUGIN_NAME: &str = "config";

/// Descriptor of the built-in config plugin.
pub static CONFIG_PLUGIN: PluginDescriptor = PluginDescriptor::config(
    CONFIG_PLUGIN_NAME,
    "Configure linked rooms",
    ConfigPlugin::create,
);

struct ConfigPlugin {
    api: PluginApi,
}

impl ConfigPlugin {
    fn create(api: PluginApi) -> Arc<dyn Plugin> {
        Arc::new(Self { api })
    }
}

#[async_trait]
impl Plugin for ConfigPlugin {
    fn about(&self) -> String {
        format!(
            "Configure linked rooms, see `{}{CONFIG_PLUGIN_NAME} --help`",
            self.api.settings().command_prefix
        )
    }

    async fn setup(&self) -> Result<bool, BoxError> {
        let api = self.api.clone();
        self.api
            .add_command_handler(CONFIG_PLUGIN_NAME, move |message, args| {
                let api = api.clone();
                async move {
                    let reply = handle(&api, &message, &args).await;
                    api.send_text(&reply).await?;
                    Ok::<(), BoxError>(())
                }
            });
        Ok(true)
    }
}

fn command() -> Command {
    let plugin = || Arg::new("plugin").required(true).value_name("PLUGIN");
    let user = || Arg::new("user").required(true).value_name("USER_ID");
    let role = || Arg::new("role").required(true).value_name("ROLE");
    let level = || {
        Arg::new("level")
            .required(true)
            .value_name("LEVEL")
            .value_parser(value_parser!(i64))
            .allow_negative_numbers(true)
    };

    Command::new(CONFIG_PLUGIN_NAME)
        .about("Configure the rooms linked to this room")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .disable_help_subcommand(true)
        .arg(
            Arg::new("room")
                .long("room")
                .short('r')
                .global(true)
                .value_name("ROOM_ID")
                .help("Room to configure, required when several are linked"),
        )
        .subcommand(Command::new("rooms").about("List the rooms configured from here"))
        .subcommand(Command::new("plugins").about("List loaded and available plugins"))
        .subcommand(
            Command::new("activate")
                .about("Activate a plugin")
                .arg(plugin()),
        )
        .subcommand(Command::new("remove").about("Remove a plugin").arg(plugin()))
        .subcommand(
            Command::new("grant")
                .about("Grant a role to a user")
                .arg(user())
                .arg(role()),
        )
        .subcommand(
            Command::new("revoke")
                .about("Revoke a role from a user")
                .arg(user())
                .arg(role()),
        )
        .subcommand(
            Command::new("clear")
                .about("Revoke every role of a user")
                .arg(user()),
        )
        .subcommand(
            Command::new("grant-level")
                .about("Grant a role to everyone at or above a power level")
                .arg(level())
                .arg(role()),
        )
        .subcommand(
            Command::new("revoke-level")
                .about("Revoke a power-level role")
                .arg(level())
                .arg(role()),
        )
        .subcommand(Command::new("acl").about("Show the access list"))
        .subcommand(
            Command::new("plugin")
                .about("Configure a plugin")
                .arg(Arg::new("name").required(true).value_name("PLUGIN"))
                .arg(
                    Arg::new("args")
                        .num_args(0..)
                        .trailing_var_arg(true)
                        .allow_hyphen_values(true)
                        .value_name("ARGS"),
                ),
        )
        .subcommand(Command::new("reinvite").about("Re-invite yourself to this room"))
}

/// Runs one `config` invocation and returns the reply text.
async fn handle(api: &PluginApi, message: &TextMessage, args: &str) -> String {
    let matches = match parse_args(command(), args) {
        Ok(matches) => matches,
        Err(rendered) => return rendered,
    };
    match run(api, message, &matches).await {
        Ok(reply) => reply,
        Err(e) => format!("Error: {e}"),
    }
}

async fn run(api: &PluginApi, message: &TextMessage, matches: &ArgMatches) -> Result<String, BoxError> {
    let tracker = api.tracker().ok_or(FrameworkError::TrackerGone)?;
    let Some((sub, sub_matches)) = matches.subcommand() else {
        return Ok(command().render_usage().to_string());
    };
    let explicit_room = sub_matches
        .get_one::<String>("room")
        .or_else(|| matches.get_one::<String>("room"))
        .cloned();

    let targets = match tracker.get(api.room_id()) {
        Some(room) => room.config_targets().await?,
        None => Vec::new(),
    };

    match sub {
        "rooms" => return list_rooms(api, &tracker, message, &targets).await,
        "reinvite" => return Ok("Re-inviting to a config room is not supported".to_string()),
        _ => {}
    }

    let target_id = match explicit_room {
        Some(room_id) if targets.contains(&room_id) => room_id,
        Some(room_id) => return Ok(format!("Room {room_id} is not configured from here")),
        None => match targets.as_slice() {
            [only] => only.clone(),
            [] => return Ok("This room does not configure any room".to_string()),
            many => {
                return Ok(format!(
                    "This room configures {} rooms, pass --room <ROOM_ID>",
                    many.len()
                ));
            }
        },
    };
    let Some(target) = tracker.get(&target_id) else {
        return Ok(format!("Room {target_id} is not active"));
    };

    if !is_authorized(api, &target, &message.sender).await? {
        info!(room_id = %target_id, user_id = %message.sender, command = sub, "Config command rejected");
        return Ok(format!("You are not allowed to configure {target_id}"));
    }
    debug!(room_id = %target_id, user_id = %message.sender, command = sub, "Config command");

    match sub {
        "plugins" => Ok(list_plugins(api, &target)),
        "activate" => {
            let name = required(sub_matches, "plugin")?;
            let outcome = target.activate_plugin(name).await;
            Ok(format!("Plugin {name}: {outcome}"))
        }
        "remove" => {
            let name = required(sub_matches, "plugin")?;
            let outcome = target.remove_plugin(name).await;
            Ok(format!("Plugin {name}: {outcome}"))
        }
        "grant" | "revoke" => {
            let user = required(sub_matches, "user")?;
            let role = required(sub_matches, "role")?;
            let mut scope = target.acl().scope().await?;
            if sub == "grant" {
                scope.user_role_add(user, role);
            } else {
                scope.user_role_remove(user, role);
            }
            scope.commit().await?;
            Ok(format!("{sub}: {user} {role} in {target_id}"))
        }
        "clear" => {
            let user = required(sub_matches, "user")?;
            let mut scope = target.acl().scope().await?;
            scope.user_roles_clear(user);
            scope.commit().await?;
            Ok(format!("Cleared every role of {user} in {target_id}"))
        }
        "grant-level" | "revoke-level" => {
            let level = *sub_matches
                .get_one::<i64>("level")
                .ok_or("missing argument 'level'")?;
            let role = required(sub_matches, "role")?;
            let mut scope = target.acl().scope().await?;
            if sub == "grant-level" {
                scope.level_role_add(level, role);
            } else {
                scope.level_role_remove(level, role);
            }
            scope.commit().await?;
            Ok(format!("{sub}: >= {level} {role} in {target_id}"))
        }
        "acl" => Ok(render_acl(&target).await?),
        "plugin" => {
            let name = required(sub_matches, "name")?;
            let args: Vec<String> = sub_matches
                .get_many::<String>("args")
                .map(|values| values.cloned().collect())
                .unwrap_or_default();
            configure_plugin(&target, name, &args).await
        }
        other => Ok(format!("Unknown subcommand '{other}'")),
    }
}

fn required<'a>(matches: &'a ArgMatches, id: &str) -> Result<&'a str, BoxError> {
    matches
        .get_one::<String>(id)
        .map(String::as_str)
        .ok_or_else(|| format!("missing argument '{id}'").into())
}

async fn is_authorized(api: &PluginApi, target: &Room, user_id: &str) -> Result<bool, BoxError> {
    let level = api.power_level_in(target.room_id(), user_id).await.ok();
    Ok(target
        .acl()
        .is_allowed(CONFIG_ROLE, Some(user_id), level)
        .await?)
}

async fn list_rooms(
    api: &PluginApi,
    tracker: &RoomTracker,
    message: &TextMessage,
    targets: &[String],
) -> Result<String, BoxError> {
    let mut out = String::from("Rooms configured from here:");
    let mut shown = 0;
    for room_id in targets {
        let Some(room) = tracker.get(room_id) else {
            continue;
        };
        if !is_authorized(api, &room, &message.sender).await? {
            continue;
        }
        let mode = room.mode().map(|m| m.to_string()).unwrap_or_default();
        let _ = write!(out, "\n  {room_id} ({mode})");
        shown += 1;
    }
    if shown == 0 {
        out.push_str("\n  (none)");
    }
    Ok(out)
}

fn list_plugins(api: &PluginApi, target: &Room) -> String {
    let mut out = format!("Plugins in {}:", target.room_id());
    let loaded = target.module_names();
    if loaded.is_empty() {
        out.push_str("\n  (none)");
    }
    for name in &loaded {
        let about = target.module(name).map(|m| m.about()).unwrap_or_default();
        let _ = write!(out, "\n  {name}: {about}");
    }

    out.push_str("\nAvailable:");
    for descriptor in api.registry().of_type(PluginType::Interaction) {
        if !loaded.contains(&descriptor.name) {
            let _ = write!(out, "\n  {}: {}", descriptor.name, descriptor.desc);
        }
    }
    out
}

async fn render_acl(target: &Room) -> Result<String, BoxError> {
    let snapshot = target.acl().snapshot().await?;
    let mut out = format!("Access list of {}:", target.room_id());
    if snapshot.is_empty() {
        out.push_str("\n  (empty)");
    }
    for (user, roles) in &snapshot.users {
        let roles: Vec<&str> = roles.iter().map(String::as_str).collect();
        let _ = write!(out, "\n  {user}: {}", roles.join(", "));
    }
    for (level, roles) in &snapshot.levels {
        let roles: Vec<&str> = roles.iter().map(String::as_str).collect();
        let _ = write!(out, "\n  level >= {level}: {}", roles.join(", "));
    }
    Ok(out)
}

async fn configure_plugin(target: &Room, name: &str, args: &[String]) -> Result<String, BoxError> {
    let Some(module) = target.module(name) else {
        return Ok(format!("Plugin {name} is not loaded in {}", target.room_id()));
    };
    let Some(command) = module.config_command() else {
        return Ok(format!("Plugin {name} has no configuration"));
    };
    let command = command.name(module.name());
    let argv = std::iter::once(module.name().to_string()).chain(args.iter().cloned());
    match command.try_get_matches_from(argv) {
        Ok(matches) => module.configure(&matches).await,
        Err(e) => Ok(e.render().to_string().trim_end().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use roost_core::testing::MockTransport;

    const ROOM: &str = "!room:test";
    const OTHER: &str = "!other:test";

    struct Setup {
        h: Harness,
        config_room: Arc<Room>,
    }

    /// Alice invites the bot into `ROOM` (and `OTHER`, if `both`).
    async fn setup(both: bool) -> Setup {
        let h = Harness::new(
            MockTransport::new(BOT)
                .with_room(ROOM, [ALICE, BOB])
                .with_room(OTHER, [ALICE, BOB]),
        );
        let room = h.tracker.setup_joined_room(ROOM, Some(ALICE)).await.unwrap();
        if both {
            h.tracker.setup_joined_room(OTHER, Some(ALICE)).await.unwrap();
        }
        let config_id = room.config_sources().await.unwrap().remove(0);
        let config_room = h.tracker.get(&config_id).unwrap();
        Setup { h, config_room }
    }

    impl Setup {
        /// Sends `body` to the config room and returns the bot's reply.
        async fn say(&self, sender: &str, body: &str) -> String {
            let before = self.h.transport.sent_to(self.config_room.room_id()).len();
            let report = self
                .config_room
                .on_text_event(TextMessage::new(self.config_room.room_id(), sender, body))
                .await;
            assert!(report.is_clean(), "{report:?}");
            let sent = self.h.transport.sent_to(self.config_room.room_id());
            assert_eq!(sent.len(), before + 1, "expected exactly one reply");
            sent[before].clone()
        }

        fn room(&self) -> Arc<Room> {
            self.h.tracker.get(ROOM).unwrap()
        }
    }

    #[tokio::test]
    async fn test_owner_activates_and_removes() {
        let s = setup(false).await;

        assert_eq!(s.say(ALICE, "!config activate echo").await, "Plugin echo: activated");
        assert!(s.room().has_module("echo"));
        assert_eq!(
            s.say(ALICE, "!config activate echo").await,
            "Plugin echo: already loaded"
        );
        assert_eq!(s.say(ALICE, "!config activate nope").await, "Plugin nope: not found");

        let listing = s.say(ALICE, "!config plugins").await;
        assert!(listing.contains("echo: Echoes messages"));
        assert!(listing.contains("ticker: Ticks every second"));

        assert_eq!(s.say(ALICE, "!config remove echo").await, "Plugin echo: removed");
        assert!(!s.room().has_module("echo"));
    }

    #[tokio::test]
    async fn test_unauthorized_user_is_rejected() {
        let s = setup(false).await;

        assert_eq!(
            s.say(BOB, "!config activate echo").await,
            format!("You are not allowed to configure {ROOM}")
        );
        assert!(!s.room().has_module("echo"));
        assert!(s.say(BOB, "!config rooms").await.contains("(none)"));
        assert!(s.say(ALICE, "!config rooms").await.contains(ROOM));
    }

    #[tokio::test]
    async fn test_admin_is_always_allowed() {
        let s = setup(false).await;
        assert_eq!(s.say(ADMIN, "!config activate echo").await, "Plugin echo: activated");
    }

    #[tokio::test]
    async fn test_power_level_grant() {
        let s = setup(false).await;
        s.h.transport.set_power_level(ROOM, BOB, 50);

        assert_eq!(
            s.say(ALICE, "!config grant-level 50 config").await,
            format!("grant-level: >= 50 config in {ROOM}")
        );
        assert_eq!(s.say(BOB, "!config activate echo").await, "Plugin echo: activated");

        s.say(ALICE, "!config revoke-level 50 config").await;
        assert_eq!(
            s.say(BOB, "!config remove echo").await,
            format!("You are not allowed to configure {ROOM}")
        );
    }

    #[tokio::test]
    async fn test_user_grants() {
        let s = setup(false).await;

        s.say(ALICE, "!config grant @bob:test moderator").await;
        s.say(ALICE, "!config grant @bob:test config").await;
        let acl = s.say(BOB, "!config acl").await;
        assert!(acl.contains("@bob:test: config, moderator"));
        assert!(acl.contains("@alice:test: config"));

        s.say(ALICE, "!config clear @bob:test").await;
        let snapshot = s.room().acl().snapshot().await.unwrap();
        assert!(!snapshot.users.contains_key(BOB));
    }

    #[tokio::test]
    async fn test_several_linked_rooms_need_explicit_room() {
        let s = setup(true).await;

        assert_eq!(
            s.say(ALICE, "!config activate echo").await,
            "This room configures 2 rooms, pass --room <ROOM_ID>"
        );
        assert_eq!(
            s.say(ALICE, "!config activate echo --room !other:test").await,
            "Plugin echo: activated"
        );
        assert!(s.h.tracker.get(OTHER).unwrap().has_module("echo"));
        assert!(!s.room().has_module("echo"));

        assert_eq!(
            s.say(ALICE, "!config -r !elsewhere:test plugins").await,
            "Room !elsewhere:test is not configured from here"
        );
    }

    #[tokio::test]
    async fn test_plugin_configuration_is_forwarded() {
        let s = setup(false).await;
        s.say(ALICE, "!config activate echo").await;

        assert_eq!(
            s.say(ALICE, "!config plugin echo \"hi there\"").await,
            "greeting set to hi there"
        );
        assert!(
            s.say(ALICE, "!config plugin ticker")
                .await
                .starts_with("Plugin ticker is not loaded")
        );
    }

    #[tokio::test]
    async fn test_reinvite_and_bad_input() {
        let s = setup(false).await;

        assert_eq!(
            s.say(ALICE, "!config reinvite").await,
            "Re-inviting to a config room is not supported"
        );
        assert!(s.say(ALICE, "!config frobnicate").await.contains("frobnicate"));
        assert!(s.say(ALICE, "!config").await.contains("Usage"));
    }
}
