//! Tool Catalogue
//!
//! Schemas for the fixed set of side-effecting operations the reasoning
//! engines may request. Execution lives behind [`crate::gateway::ToolGateway`]
//! (an external collaborator); this module only describes tools and carries
//! the call/result/suspension data types through the loop.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Tool call request from a reasoning engine
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool identifier
    pub name: String,

    /// Arguments as key-value pairs
    #[serde(default)]
    pub arguments: HashMap<String, serde_json::Value>,

    /// Call ID, engine-supplied or locally generated; unique within one
    /// loop invocation
    pub call_id: String,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: HashMap<String, serde_json::Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
            call_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = call_id.into();
        self
    }
}

/// Result from tool execution, returned to the engine as conversational input
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    /// Correlates with the requesting [`ToolCall`]
    pub call_id: String,

    /// Human-readable output or error text
    pub text: String,

    /// Whether this result represents a failure
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            text: text.into(),
            is_error: false,
        }
    }

    pub fn err(call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            text: text.into(),
            is_error: true,
        }
    }
}

/// Suspension capsule for a Confirm-tier tool call.
///
/// Plain serializable data: the human approval may arrive in a later process
/// tick or after a transport reconnect. Created exactly once per suspension
/// and consumed exactly once on resume.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingConfirmation {
    /// The suspended tool
    pub tool_name: String,

    /// Its arguments
    pub tool_input: HashMap<String, serde_json::Value>,

    /// Call ID of the suspended call
    pub call_id: String,

    /// Assistant text streamed before the suspension
    pub assistant_content_so_far: String,

    /// Full message history up to and including the suspending turn and any
    /// tool results already collected in it
    pub prior_messages: Vec<Message>,
}

/// Parameter definition for tool schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, number, boolean, object, array)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,
}

impl ParameterSchema {
    fn required(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: true,
        }
    }

    fn optional(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: false,
        }
    }
}

/// Tool definition schema (for native function calling and prompt injection)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// One-line description shown to the engine
    pub description: String,

    /// Parameter definitions
    pub parameters: Vec<ParameterSchema>,
}

impl ToolSchema {
    fn new(name: &str, description: &str, parameters: Vec<ParameterSchema>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// JSON Schema object for providers with native function calling
    pub fn input_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            properties.insert(
                param.name.clone(),
                serde_json::json!({
                    "type": param.param_type,
                    "description": param.description,
                }),
            );
            if param.required {
                required.push(serde_json::Value::String(param.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// The fixed catalogue of tools offered to reasoning engines.
///
/// Read-only after construction; the tier table in [`crate::tier`] is the
/// safety authority, this is only the description surface.
#[derive(Clone, Debug, Default)]
pub struct ToolCatalog {
    schemas: Vec<ToolSchema>,
}

impl ToolCatalog {
    pub fn new(schemas: Vec<ToolSchema>) -> Self {
        Self { schemas }
    }

    /// The assistant's standard catalogue
    pub fn standard() -> Self {
        let schemas = vec![
            ToolSchema::new(
                "cluster_status",
                "Summarize cluster health: nodes, quorum, resource usage",
                vec![],
            ),
            ToolSchema::new(
                "vm_list",
                "List virtual machines and containers with their state",
                vec![ParameterSchema::optional(
                    "node",
                    "string",
                    "Restrict to one node name",
                )],
            ),
            ToolSchema::new(
                "vm_status",
                "Detailed status for one VM or container",
                vec![ParameterSchema::required(
                    "vmid",
                    "number",
                    "Numeric VM/container id",
                )],
            ),
            ToolSchema::new(
                "vm_start",
                "Start a stopped VM or container",
                vec![ParameterSchema::required(
                    "vmid",
                    "number",
                    "Numeric VM/container id",
                )],
            ),
            ToolSchema::new(
                "vm_stop",
                "Stop a running VM or container",
                vec![ParameterSchema::required(
                    "vmid",
                    "number",
                    "Numeric VM/container id",
                )],
            ),
            ToolSchema::new(
                "vm_restart",
                "Restart a VM or container",
                vec![ParameterSchema::required(
                    "vmid",
                    "number",
                    "Numeric VM/container id",
                )],
            ),
            ToolSchema::new(
                "service_restart",
                "Restart a system service on a node",
                vec![
                    ParameterSchema::required("node", "string", "Node name"),
                    ParameterSchema::required("service", "string", "Service unit name"),
                ],
            ),
            ToolSchema::new(
                "file_read",
                "Read a text file from managed storage",
                vec![ParameterSchema::required("path", "string", "Absolute path")],
            ),
            ToolSchema::new(
                "file_write",
                "Write a text file to managed storage",
                vec![
                    ParameterSchema::required("path", "string", "Absolute path"),
                    ParameterSchema::required("content", "string", "File content"),
                ],
            ),
            ToolSchema::new(
                "camera_snapshot",
                "Capture a still frame from a named camera",
                vec![ParameterSchema::required(
                    "camera",
                    "string",
                    "Camera name",
                )],
            ),
            ToolSchema::new(
                "camera_events",
                "Query recent NVR motion/person events",
                vec![
                    ParameterSchema::optional("camera", "string", "Camera name"),
                    ParameterSchema::optional("hours", "number", "Lookback window in hours"),
                ],
            ),
            ToolSchema::new(
                "presence_status",
                "Who is currently home, per presence detection",
                vec![],
            ),
            ToolSchema::new(
                "light_set",
                "Set a light or light group",
                vec![
                    ParameterSchema::required("target", "string", "Light or group name"),
                    ParameterSchema::optional("brightness", "number", "0-100"),
                    ParameterSchema::optional("state", "string", "on or off"),
                ],
            ),
            ToolSchema::new(
                "thermostat_set",
                "Set a thermostat target temperature",
                vec![
                    ParameterSchema::required("zone", "string", "Zone name"),
                    ParameterSchema::required("celsius", "number", "Target temperature"),
                ],
            ),
            ToolSchema::new(
                "media_play",
                "Play media on a named output",
                vec![
                    ParameterSchema::required("query", "string", "What to play"),
                    ParameterSchema::optional("output", "string", "Speaker/display name"),
                ],
            ),
            ToolSchema::new(
                "reminder_create",
                "Schedule a reminder",
                vec![
                    ParameterSchema::required("text", "string", "Reminder text"),
                    ParameterSchema::required("when", "string", "Time expression"),
                ],
            ),
            ToolSchema::new("reminder_list", "List upcoming reminders", vec![]),
            ToolSchema::new(
                "voice_announce",
                "Speak an announcement on home speakers",
                vec![ParameterSchema::required(
                    "text",
                    "string",
                    "Announcement text",
                )],
            ),
            ToolSchema::new("datetime", "Current date and time", vec![]),
        ];
        Self::new(schemas)
    }

    pub fn schemas(&self) -> &[ToolSchema] {
        &self.schemas
    }

    pub fn get(&self, name: &str) -> Option<&ToolSchema> {
        self.schemas.iter().find(|s| s.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Generate the system prompt section for engines without native tool
    /// calling: the catalogue plus the tagged wire protocol.
    pub fn prompt_section(&self) -> String {
        let mut prompt = String::from("## Available Tools\n\n");
        prompt.push_str(
            "To invoke a tool, emit a tagged block containing a single JSON object:\n\n\
             <tool_call>{\"name\": \"tool_name\", \"arguments\": {\"arg\": \"value\"}}</tool_call>\n\n\
             Emit one block per invocation; multiple blocks invoke multiple tools.\n\
             Tool results arrive in the next user turn inside a <tool_results> block.\n\n",
        );

        for schema in &self.schemas {
            prompt.push_str(&format!("### {}\n{}\n", schema.name, schema.description));
            if !schema.parameters.is_empty() {
                for param in &schema.parameters {
                    let required = if param.required { " (required)" } else { "" };
                    prompt.push_str(&format!(
                        "- `{}` ({}){}: {}\n",
                        param.name, param.param_type, required, param.description
                    ));
                }
            }
            prompt.push('\n');
        }

        prompt
    }
}
