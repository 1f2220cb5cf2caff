//! Contract with the line-oriented chat backend.
//!
//! The backend has no message framing: it prints human-readable lines and a
//! menu after every command. Selection codes, argument order and the marker
//! substrings below are matched byte-for-byte against its output and must be
//! revised together with the backend. Bump [`PROTOCOL_REVISION`] whenever any
//! of them change.

pub const PROTOCOL_REVISION: &str = "menu-v1";

pub const LINE_TERMINATOR: &str = "\n";

/// Lines of the group listing start with this prefix; the rest is the name.
pub const GROUP_LIST_ITEM_PREFIX: &str = "- ";

/// Separator used when the member list is sent as a single line.
pub const MEMBER_SEPARATOR: &str = ", ";

pub mod markers {
    pub const MENU: &str = "MENU";
    pub const GREETING: &str = "¡Hola";
    pub const WELCOME: &str = "Bienvenido";
    pub const HELLO: &str = "Hola";
    pub const PRIVATE_SENT: &str = "Mensaje enviado correctamente";
    pub const USER_NOT_FOUND: &str = "Usuario no encontrado";
    pub const GROUP_MEMBERS: &str = "Miembros actuales";
    pub const GROUP: &str = "Grupo";
    pub const GROUP_SENT: &str = "Mensaje enviado al grupo correctamente";
    pub const GROUP_NOT_FOUND: &str = "Grupo no encontrado";
    pub const HISTORY_END: &str = "=== FIN DEL HISTORIAL ===";
    pub const NO_HISTORY: &str = "No hay historial";
    pub const GROUP_LIST_END: &str = "=== FIN LISTA GRUPOS ===";
}

/// Set of substrings any one of which marks a reply as complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplyMarkers(&'static [&'static str]);

impl ReplyMarkers {
    pub const fn new(markers: &'static [&'static str]) -> Self {
        Self(markers)
    }

    pub fn matches(&self, text: &str) -> bool {
        self.0.iter().any(|marker| text.contains(marker))
    }

    pub fn as_slice(&self) -> &'static [&'static str] {
        self.0
    }
}

pub const LOGIN_GREETING: ReplyMarkers =
    ReplyMarkers::new(&[markers::MENU, markers::GREETING, markers::WELCOME]);

/// The backend is waiting for a selection code.
pub const READY_PROMPT: ReplyMarkers = ReplyMarkers::new(&[markers::MENU, markers::HELLO]);

const PRIVATE_MESSAGE_DONE: ReplyMarkers = ReplyMarkers::new(&[
    markers::PRIVATE_SENT,
    markers::USER_NOT_FOUND,
    markers::MENU,
]);

const CREATE_GROUP_DONE: ReplyMarkers =
    ReplyMarkers::new(&[markers::GROUP_MEMBERS, markers::GROUP, markers::MENU]);

const GROUP_MESSAGE_DONE: ReplyMarkers = ReplyMarkers::new(&[
    markers::GROUP_SENT,
    markers::GROUP_NOT_FOUND,
    markers::MENU,
]);

const HISTORY_DONE: ReplyMarkers =
    ReplyMarkers::new(&[markers::HISTORY_END, markers::NO_HISTORY, markers::MENU]);

const GROUP_LIST_DONE: ReplyMarkers =
    ReplyMarkers::new(&[markers::GROUP_LIST_END, markers::MENU]);

/// Which configured hard ceiling applies to a command's reply wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitCeiling {
    Standard,
    GroupList,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendCommand {
    PrivateMessage { to: String, message: String },
    CreateGroup { group: String, members: Vec<String> },
    GroupMessage { group: String, message: String },
    PrivateHistory { with: Option<String> },
    GroupHistory { group: Option<String> },
    ListGroups,
}

impl BackendCommand {
    pub fn selection_code(&self) -> &'static str {
        match self {
            BackendCommand::PrivateMessage { .. } => "1",
            BackendCommand::CreateGroup { .. } => "2",
            BackendCommand::GroupMessage { .. } => "3",
            BackendCommand::PrivateHistory { .. } => "7",
            BackendCommand::GroupHistory { .. } => "8",
            BackendCommand::ListGroups => "9",
        }
    }

    /// Stable label used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            BackendCommand::PrivateMessage { .. } => "message.private",
            BackendCommand::CreateGroup { .. } => "group.create",
            BackendCommand::GroupMessage { .. } => "message.group",
            BackendCommand::PrivateHistory { .. } => "history.private",
            BackendCommand::GroupHistory { .. } => "history.group",
            BackendCommand::ListGroups => "groups.list",
        }
    }

    /// Lines to write, in order, without terminators.
    pub fn lines(&self) -> Vec<String> {
        let code = self.selection_code().to_string();
        match self {
            BackendCommand::PrivateMessage { to, message } => {
                vec![code, to.clone(), message.clone()]
            }
            BackendCommand::CreateGroup { group, members } => {
                vec![code, group.clone(), members.join(MEMBER_SEPARATOR)]
            }
            BackendCommand::GroupMessage { group, message } => {
                vec![code, group.clone(), message.clone()]
            }
            BackendCommand::PrivateHistory { with } => {
                vec![code, with.clone().unwrap_or_default()]
            }
            BackendCommand::GroupHistory { group } => {
                vec![code, group.clone().unwrap_or_default()]
            }
            BackendCommand::ListGroups => vec![code],
        }
    }

    pub fn completion(&self) -> ReplyMarkers {
        match self {
            BackendCommand::PrivateMessage { .. } => PRIVATE_MESSAGE_DONE,
            BackendCommand::CreateGroup { .. } => CREATE_GROUP_DONE,
            BackendCommand::GroupMessage { .. } => GROUP_MESSAGE_DONE,
            BackendCommand::PrivateHistory { .. } | BackendCommand::GroupHistory { .. } => {
                HISTORY_DONE
            }
            BackendCommand::ListGroups => GROUP_LIST_DONE,
        }
    }

    /// Interactive commands first wait for the menu; queries write at once.
    pub fn awaits_ready_prompt(&self) -> bool {
        matches!(
            self,
            BackendCommand::PrivateMessage { .. }
                | BackendCommand::CreateGroup { .. }
                | BackendCommand::GroupMessage { .. }
        )
    }

    pub fn wait_ceiling(&self) -> WaitCeiling {
        match self {
            BackendCommand::ListGroups => WaitCeiling::GroupList,
            _ => WaitCeiling::Standard,
        }
    }
}

/// Extract group names from the backend's group listing.
///
/// Lines that do not start with [`GROUP_LIST_ITEM_PREFIX`] are ignored.
pub fn parse_group_list(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.strip_prefix(GROUP_LIST_ITEM_PREFIX))
        .map(|name| name.trim_end().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}
