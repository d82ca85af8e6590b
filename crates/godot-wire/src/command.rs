//! Commands exchanged with the engine.
//!
//! Every frame payload is one encoded array: `[name, thread_id, parameters]`
//! on threaded protocol revisions and `[name, parameters]` on older ones.
//! [`Command`] is the raw form; [`EngineMessage`] is the typed view of the
//! inbound commands the adapter understands.

use crate::{
    frame::encode_frame,
    types::{Result, WireError},
    variant::{encode_variant, Variant, VariantReader, DEFAULT_MAX_DEPTH},
};

/// Whether frames carry a thread id between the name and the parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolRevision {
    /// `[name, parameters]`.
    Legacy,
    /// `[name, thread_id, parameters]`.
    #[default]
    Threaded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub thread_id: Option<i64>,
    pub parameters: Vec<Variant>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            thread_id: None,
            parameters: Vec::new(),
        }
    }

    pub fn with_params(name: impl Into<String>, parameters: Vec<Variant>) -> Self {
        Self {
            name: name.into(),
            thread_id: None,
            parameters,
        }
    }

    pub fn with_thread_id(mut self, thread_id: i64) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    pub fn break_execution() -> Self {
        Self::new("break")
    }

    pub fn continue_execution() -> Self {
        Self::new("continue")
    }

    pub fn next() -> Self {
        Self::new("next")
    }

    pub fn step() -> Self {
        Self::new("step")
    }

    /// Adds (`enabled`) or removes a breakpoint at `path:line`.
    pub fn breakpoint(path: &str, line: u32, enabled: bool) -> Self {
        Self::with_params(
            "breakpoint",
            vec![path.into(), line.into(), enabled.into()],
        )
    }

    pub fn inspect_object(object_id: u64) -> Self {
        Self::with_params("scene:inspect_object", vec![object_id_param(object_id)])
    }

    pub fn request_scene_tree() -> Self {
        Self::new("scene:request_scene_tree")
    }

    pub fn get_stack_dump() -> Self {
        Self::new("get_stack_dump")
    }

    pub fn get_stack_frame_vars(frame_id: u32) -> Self {
        Self::with_params("get_stack_frame_vars", vec![frame_id.into()])
    }

    pub fn set_object_property(object_id: u64, property: &str, value: Variant) -> Self {
        Self::with_params(
            "scene:set_object_property",
            vec![object_id_param(object_id), property.into(), value],
        )
    }

    /// The array this command is carried as. The thread id is only emitted
    /// when one is set.
    pub fn to_variant(&self) -> Variant {
        let mut items = Vec::with_capacity(3);
        items.push(Variant::String(self.name.clone()));
        if let Some(thread_id) = self.thread_id {
            items.push(Variant::Int(thread_id));
        }
        items.push(Variant::Array(self.parameters.clone()));
        Variant::Array(items)
    }

    /// Length-prefixed frame ready to be written to the socket.
    pub fn encode(&self) -> Vec<u8> {
        encode_frame(&encode_variant(&self.to_variant()))
    }

    /// Rebuilds a command from a decoded frame value, accepting both protocol
    /// revisions.
    pub fn from_variant(value: Variant) -> Result<Self> {
        let items = match value {
            Variant::Array(items) | Variant::TypedArray { items, .. } => items,
            other => {
                return Err(WireError::MalformedCommand(format!(
                    "expected an array, got {}",
                    other.type_name()
                )))
            }
        };

        let mut items = items.into_iter();
        let name = match items.next() {
            Some(Variant::String(name)) | Some(Variant::StringName(name)) => name,
            Some(other) => {
                return Err(WireError::MalformedCommand(format!(
                    "command name must be a string, got {}",
                    other.type_name()
                )))
            }
            None => return Err(WireError::MalformedCommand("empty command array".into())),
        };

        let rest: Vec<Variant> = items.collect();
        let (thread_id, parameters) = match <[Variant; 2]>::try_from(rest) {
            Ok([Variant::Int(thread_id), parameters]) => (Some(thread_id), parameters),
            Ok([other, _]) => {
                return Err(WireError::MalformedCommand(format!(
                    "`{name}`: thread id must be an int, got {}",
                    other.type_name()
                )))
            }
            Err(rest) => match <[Variant; 1]>::try_from(rest) {
                Ok([parameters]) => (None, parameters),
                Err(rest) => {
                    return Err(WireError::MalformedCommand(format!(
                        "`{name}`: expected 2 or 3 elements, got {}",
                        rest.len() + 1
                    )))
                }
            },
        };

        let parameters = match parameters {
            Variant::Array(items) | Variant::TypedArray { items, .. } => items,
            Variant::Nil => Vec::new(),
            other => {
                return Err(WireError::MalformedCommand(format!(
                    "`{name}`: parameters must be an array, got {}",
                    other.type_name()
                )))
            }
        };

        Ok(Self {
            name,
            thread_id,
            parameters,
        })
    }

    /// Decodes one frame payload (without its length prefix).
    ///
    /// The payload must hold exactly one value.
    pub fn decode(payload: &[u8], max_depth: usize) -> Result<Self> {
        let mut reader = VariantReader::new(payload).with_max_depth(max_depth);
        let value = reader.read_variant()?;
        if reader.remaining() != 0 {
            return Err(WireError::TrailingBytes {
                remaining: reader.remaining(),
            });
        }
        Self::from_variant(value)
    }

    pub fn revision(&self) -> ProtocolRevision {
        match self.thread_id {
            Some(_) => ProtocolRevision::Threaded,
            None => ProtocolRevision::Legacy,
        }
    }
}

impl TryFrom<&[u8]> for Command {
    type Error = WireError;

    fn try_from(payload: &[u8]) -> Result<Self> {
        Self::decode(payload, DEFAULT_MAX_DEPTH)
    }
}

fn object_id_param(object_id: u64) -> Variant {
    // Instance ids are sent as plain 64-bit ints; the engine reinterprets the bits.
    Variant::Int(object_id as i64)
}

/// One frame of a stack dump. Frame ids are the index in the dump, 0 on top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrameInfo {
    pub file: String,
    pub line: i64,
    pub function: String,
}

/// Which scope a stack variable belongs to (the wire uses 0, 1 and 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Locals,
    Members,
    Globals,
}

impl ScopeKind {
    pub const ALL: [ScopeKind; 3] = [ScopeKind::Locals, ScopeKind::Members, ScopeKind::Globals];

    pub fn from_wire(index: i64) -> Option<Self> {
        match index {
            0 => Some(ScopeKind::Locals),
            1 => Some(ScopeKind::Members),
            2 => Some(ScopeKind::Globals),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        match self {
            ScopeKind::Locals => 0,
            ScopeKind::Members => 1,
            ScopeKind::Globals => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ScopeKind::Locals => "Locals",
            ScopeKind::Members => "Members",
            ScopeKind::Globals => "Globals",
        }
    }
}

/// Variables of one stack frame, split by scope, in engine order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeVars {
    pub locals: Vec<(String, Variant)>,
    pub members: Vec<(String, Variant)>,
    pub globals: Vec<(String, Variant)>,
}

impl ScopeVars {
    pub fn scope(&self, kind: ScopeKind) -> &[(String, Variant)] {
        match kind {
            ScopeKind::Locals => &self.locals,
            ScopeKind::Members => &self.members,
            ScopeKind::Globals => &self.globals,
        }
    }

    pub fn scope_mut(&mut self, kind: ScopeKind) -> &mut Vec<(String, Variant)> {
        match kind {
            ScopeKind::Locals => &mut self.locals,
            ScopeKind::Members => &mut self.members,
            ScopeKind::Globals => &mut self.globals,
        }
    }

    pub fn len(&self) -> usize {
        self.locals.len() + self.members.len() + self.globals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Header of a `stack_frame_vars` reply.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameVars {
    /// Current engines announce a count and stream `stack_frame_var` messages.
    Expect(usize),
    /// Older engines send every variable in the same message.
    Batched(ScopeVars),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneNode {
    pub name: String,
    pub class_name: String,
    pub object_id: u64,
    pub scene_file_path: String,
    pub view_flags: i64,
    pub children: Vec<SceneNode>,
}

/// Inbound commands, typed.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineMessage {
    DebugEnter {
        can_continue: bool,
        reason: String,
        has_stackdump: bool,
    },
    DebugExit,
    SetPid,
    StackDump(Vec<StackFrameInfo>),
    StackFrameVars(FrameVars),
    StackFrameVar {
        name: String,
        scope: ScopeKind,
        value: Variant,
    },
    InspectObject {
        object_id: u64,
        class_name: String,
        properties: Vec<(String, Variant)>,
    },
    SceneTree(SceneNode),
    Output(Vec<String>),
    Error {
        source: String,
        message: String,
    },
    /// Anything the adapter does not interpret.
    Unknown(Command),
}

impl EngineMessage {
    pub fn parse(command: Command) -> Result<Self> {
        let params = &command.parameters;
        let message = match command.name.as_str() {
            "debug_enter" => EngineMessage::DebugEnter {
                can_continue: params.first().and_then(Variant::as_bool).unwrap_or(true),
                reason: params
                    .get(1)
                    .and_then(Variant::as_str)
                    .unwrap_or_default()
                    .to_string(),
                has_stackdump: params.get(2).and_then(Variant::as_bool).unwrap_or(false),
            },
            "debug_exit" => EngineMessage::DebugExit,
            "set_pid" => EngineMessage::SetPid,
            "stack_dump" => EngineMessage::StackDump(parse_stack_dump(params)?),
            "stack_frame_vars" => EngineMessage::StackFrameVars(parse_frame_vars(params)?),
            "stack_frame_var" => {
                let name = string_at(params, 0, "stack_frame_var")?;
                let scope_index = int_at(params, 1, "stack_frame_var")?;
                let scope = ScopeKind::from_wire(scope_index).ok_or_else(|| {
                    WireError::MalformedCommand(format!(
                        "stack_frame_var: unknown scope {scope_index}"
                    ))
                })?;
                let value = params.get(3).cloned().unwrap_or(Variant::Nil);
                EngineMessage::StackFrameVar { name, scope, value }
            }
            "scene:inspect_object" => parse_inspect_object(params)?,
            "scene:scene_tree" => {
                let mut offset = 0;
                EngineMessage::SceneTree(parse_scene_node(params, &mut offset, 0)?)
            }
            "output" => {
                let lines = match params.first() {
                    Some(Variant::PackedStringArray(lines)) => lines.clone(),
                    Some(Variant::Array(items)) => items.iter().map(output_line).collect(),
                    _ => Vec::new(),
                };
                EngineMessage::Output(lines)
            }
            "error" => parse_error(params),
            _ => EngineMessage::Unknown(command),
        };
        Ok(message)
    }
}

fn output_line(item: &Variant) -> String {
    match item {
        Variant::String(s) | Variant::StringName(s) => s.clone(),
        // Older engines wrap each line in a one-element array.
        Variant::Array(inner) => inner.first().map(output_line).unwrap_or_default(),
        other => format!("{other:?}"),
    }
}

fn string_at(params: &[Variant], index: usize, what: &str) -> Result<String> {
    params
        .get(index)
        .and_then(Variant::as_str)
        .map(str::to_string)
        .ok_or_else(|| WireError::MalformedCommand(format!("{what}: expected a string at {index}")))
}

fn int_at(params: &[Variant], index: usize, what: &str) -> Result<i64> {
    params
        .get(index)
        .and_then(Variant::as_int)
        .ok_or_else(|| WireError::MalformedCommand(format!("{what}: expected an int at {index}")))
}

fn object_id_at(params: &[Variant], index: usize, what: &str) -> Result<u64> {
    match params.get(index) {
        Some(Variant::Int(id)) => Ok(*id as u64),
        Some(Variant::ObjectId(id)) => Ok(*id),
        _ => Err(WireError::MalformedCommand(format!(
            "{what}: expected an object id at {index}"
        ))),
    }
}

fn parse_stack_dump(params: &[Variant]) -> Result<Vec<StackFrameInfo>> {
    // Dictionary form: one `{file, line, function}` entry per frame.
    if params
        .first()
        .is_some_and(|p| matches!(p, Variant::Dictionary(_)))
    {
        return params
            .iter()
            .map(|entry| {
                let Variant::Dictionary(entries) = entry else {
                    return Err(WireError::MalformedCommand(
                        "stack_dump: mixed frame encodings".into(),
                    ));
                };
                let field = |key: &str| {
                    entries
                        .iter()
                        .find(|(k, _)| k.as_str() == Some(key))
                        .map(|(_, v)| v)
                };
                Ok(StackFrameInfo {
                    file: field("file")
                        .and_then(Variant::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    line: field("line").and_then(Variant::as_int).unwrap_or_default(),
                    function: field("function")
                        .and_then(Variant::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .collect();
    }

    // Flat form: a leading element, then `file, line, function` triples.
    let mut frames = Vec::new();
    let mut i = 1;
    while i + 2 < params.len() {
        frames.push(StackFrameInfo {
            file: string_at(params, i, "stack_dump")?,
            line: int_at(params, i + 1, "stack_dump")?,
            function: string_at(params, i + 2, "stack_dump")?,
        });
        i += 3;
    }
    Ok(frames)
}

fn parse_frame_vars(params: &[Variant]) -> Result<FrameVars> {
    if params.len() <= 1 {
        let count = match params.first() {
            Some(v) => v.as_int().ok_or_else(|| {
                WireError::MalformedCommand("stack_frame_vars: count must be an int".into())
            })?,
            None => 0,
        };
        let count = usize::try_from(count).map_err(|_| {
            WireError::MalformedCommand(format!("stack_frame_vars: negative count {count}"))
        })?;
        return Ok(FrameVars::Expect(count));
    }

    let mut vars = ScopeVars::default();
    let mut i = 0;
    for kind in ScopeKind::ALL {
        let count = int_at(params, i, "stack_frame_vars")?;
        i += 1;
        for _ in 0..count.max(0) {
            let name = string_at(params, i, "stack_frame_vars")?;
            let value = params.get(i + 1).cloned().ok_or_else(|| {
                WireError::MalformedCommand(format!("stack_frame_vars: `{name}` has no value"))
            })?;
            vars.scope_mut(kind).push((name, value));
            i += 2;
        }
    }
    Ok(FrameVars::Batched(vars))
}

fn parse_inspect_object(params: &[Variant]) -> Result<EngineMessage> {
    const WHAT: &str = "scene:inspect_object";
    let object_id = object_id_at(params, 0, WHAT)?;
    let class_name = string_at(params, 1, WHAT)?;
    let raw = params
        .get(2)
        .and_then(Variant::as_array)
        .ok_or_else(|| WireError::MalformedCommand(format!("{WHAT}: missing property list")))?;

    // Each property is `[name, type, hint, hint_string, usage, value]`.
    let mut properties = Vec::with_capacity(raw.len());
    for prop in raw {
        let fields = prop.as_array().ok_or_else(|| {
            WireError::MalformedCommand(format!("{WHAT}: property must be an array"))
        })?;
        let name = string_at(fields, 0, WHAT)?;
        let value = fields.get(5).cloned().unwrap_or(Variant::Nil);
        properties.push((name, value));
    }

    Ok(EngineMessage::InspectObject {
        object_id,
        class_name,
        properties,
    })
}

fn parse_scene_node(params: &[Variant], offset: &mut usize, depth: usize) -> Result<SceneNode> {
    const WHAT: &str = "scene:scene_tree";
    if depth > DEFAULT_MAX_DEPTH * 16 {
        return Err(WireError::MalformedCommand(format!("{WHAT}: tree too deep")));
    }
    let base = *offset;
    let child_count = int_at(params, base, WHAT)?;
    let name = string_at(params, base + 1, WHAT)?;
    let class_name = string_at(params, base + 2, WHAT)?;
    let object_id = object_id_at(params, base + 3, WHAT)?;
    let scene_file_path = string_at(params, base + 4, WHAT)?;
    let view_flags = int_at(params, base + 5, WHAT)?;
    *offset = base + 6;

    // Every child needs at least six more elements.
    let remaining = params.len().saturating_sub(*offset);
    let child_count = usize::try_from(child_count)
        .ok()
        .filter(|count| count.saturating_mul(6) <= remaining)
        .ok_or_else(|| {
            WireError::MalformedCommand(format!("{WHAT}: bad child count {child_count}"))
        })?;

    let mut children = Vec::with_capacity(child_count);
    for _ in 0..child_count {
        children.push(parse_scene_node(params, offset, depth + 1)?);
    }

    Ok(SceneNode {
        name,
        class_name,
        object_id,
        scene_file_path,
        view_flags,
        children,
    })
}

fn parse_error(params: &[Variant]) -> EngineMessage {
    // `[hr, min, sec, msec, function, file, line, error, description, warning, ...]`
    let text = |i: usize| {
        params
            .get(i)
            .and_then(Variant::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let file = text(5);
    let line = params.get(6).and_then(Variant::as_int);
    let error = text(7);
    let description = text(8);

    let source = match (file.is_empty(), line) {
        (false, Some(line)) => format!("{file}:{line}"),
        (false, None) => file,
        (true, _) => text(4),
    };
    let message = if description.is_empty() {
        error
    } else {
        description
    };
    EngineMessage::Error { source, message }
}
