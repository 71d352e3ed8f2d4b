//! Service descriptor documents for the service-manager supervisor.
//!
//! The supervisor describes each game server to the host service manager
//! with a small XML document: identity, executable and arguments, working
//! directory, log handling, an on-failure restart ladder and the service
//! account. The document is rendered by hand and parsed back only as far
//! as the fields this daemon owns.

use base64::Engine;
use gameapd_common::{Error, Result};
use gameapd_config::Config;
use gameapd_domain::{make_full_command, Server};
use std::path::Path;

/// On-failure action entry of the descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnFailure {
    pub action: String,
    pub delay: String,
}

/// Service descriptor for one game server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub id: String,
    pub name: String,
    pub executable: String,
    pub arguments: String,
    pub working_directory: String,
    pub log_mode: String,
    pub on_failure: Vec<OnFailure>,
    pub reset_failure: String,
    pub username: String,
    pub password: String,
}

impl ServiceDescriptor {
    /// Build the descriptor for a server from its resolved start command.
    ///
    /// The service account password comes from the configured user table;
    /// a `base64:` prefix marks an encoded entry.
    pub fn for_server(cfg: &Config, server: &Server, service_name: &str) -> Result<Self> {
        let command = make_full_command(cfg, server, &cfg.scripts.start, &server.start_command());
        if command.is_empty() {
            return Err(Error::EmptyCommand);
        }

        let words = shell_words::split(&command)
            .map_err(|e| Error::internal(format!("failed to split command: {e}")))?;
        if words.is_empty() {
            return Err(Error::EmptyCommand);
        }

        let mut executable = words[0].clone();
        let mut args: Vec<String> = Vec::with_capacity(words.len() + 1);

        // batch files cannot be service entry points directly
        if Path::new(&executable)
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("bat"))
            .unwrap_or(false)
        {
            args.push("/c".to_string());
            args.push(executable);
            executable = "cmd.exe".to_string();
        }

        args.extend(words[1..].iter().cloned());

        let user = server.user();
        let password = resolve_password(cfg, &user)?;

        Ok(Self {
            id: service_name.to_string(),
            name: service_name.to_string(),
            executable,
            arguments: args.join(" "),
            working_directory: server.work_dir(cfg).to_string_lossy().into_owned(),
            log_mode: "reset".to_string(),
            on_failure: vec![
                OnFailure {
                    action: "restart".to_string(),
                    delay: "1 sec".to_string(),
                },
                OnFailure {
                    action: "restart".to_string(),
                    delay: "2 sec".to_string(),
                },
                OnFailure {
                    action: "restart".to_string(),
                    delay: "5 sec".to_string(),
                },
                OnFailure {
                    action: "restart".to_string(),
                    delay: "5 sec".to_string(),
                },
            ],
            reset_failure: "1 hour".to_string(),
            username: user,
            password,
        })
    }

    /// Render the descriptor document.
    pub fn to_xml(&self) -> String {
        let mut buf = String::new();
        buf.push_str("<service>\n");
        buf.push_str(&format!("  <id>{}</id>\n", xml_escape(&self.id)));
        buf.push_str(&format!("  <name>{}</name>\n", xml_escape(&self.name)));
        buf.push_str(&format!(
            "  <executable>{}</executable>\n",
            xml_escape(&self.executable)
        ));
        if !self.arguments.is_empty() {
            buf.push_str(&format!(
                "  <arguments>{}</arguments>\n",
                xml_escape(&self.arguments)
            ));
        }
        if !self.working_directory.is_empty() {
            buf.push_str(&format!(
                "  <workingdirectory>{}</workingdirectory>\n",
                xml_escape(&self.working_directory)
            ));
        }
        for failure in &self.on_failure {
            buf.push_str(&format!(
                "  <onfailure action=\"{}\" delay=\"{}\"/>\n",
                xml_escape(&failure.action),
                xml_escape(&failure.delay)
            ));
        }
        if !self.reset_failure.is_empty() {
            buf.push_str(&format!(
                "  <resetfailure>{}</resetfailure>\n",
                xml_escape(&self.reset_failure)
            ));
        }
        buf.push_str(&format!("  <log mode=\"{}\"/>\n", xml_escape(&self.log_mode)));
        buf.push_str("  <serviceaccount>\n");
        buf.push_str(&format!(
            "    <username>{}</username>\n",
            xml_escape(&self.username)
        ));
        buf.push_str(&format!(
            "    <password>{}</password>\n",
            xml_escape(&self.password)
        ));
        buf.push_str("  </serviceaccount>\n");
        buf.push_str("</service>\n");
        buf
    }

    /// Parse a rendered descriptor back into its owned fields.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let field = |tag: &str| -> String {
            extract_tag(xml, tag).map(|v| xml_unescape(&v)).unwrap_or_default()
        };

        let executable = field("executable");
        if executable.is_empty() {
            return Err(Error::validation("descriptor has no executable"));
        }

        Ok(Self {
            id: field("id"),
            name: field("name"),
            executable,
            arguments: field("arguments"),
            working_directory: field("workingdirectory"),
            log_mode: extract_attr(xml, "log", "mode").unwrap_or_default(),
            on_failure: extract_on_failure(xml),
            reset_failure: field("resetfailure"),
            username: field("username"),
            password: field("password"),
        })
    }
}

fn resolve_password(cfg: &Config, user: &str) -> Result<String> {
    if user.is_empty() {
        return Err(Error::EmptyUser);
    }

    let raw = cfg
        .users
        .get(user)
        .ok_or_else(|| Error::user_not_found(user))?;

    if raw.is_empty() {
        return Err(Error::InvalidUserPassword);
    }

    match raw.strip_prefix("base64:") {
        Some(encoded) => {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|_| Error::InvalidUserPassword)?;
            String::from_utf8(decoded).map_err(|_| Error::InvalidUserPassword)
        }
        None => Ok(raw.clone()),
    }
}

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn xml_unescape(input: &str) -> String {
    input
        .replace("&quot;", "\"")
        .replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&amp;", "&")
}

fn extract_tag(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].to_string())
}

fn extract_attr(xml: &str, tag: &str, attr: &str) -> Option<String> {
    let open = format!("<{tag} ");
    let start = xml.find(&open)?;
    let rest = &xml[start..];
    let end = rest.find("/>")?;
    let element = &rest[..end];
    let marker = format!("{attr}=\"");
    let attr_start = element.find(&marker)? + marker.len();
    let attr_end = element[attr_start..].find('"')? + attr_start;
    Some(xml_unescape(&element[attr_start..attr_end]))
}

fn extract_on_failure(xml: &str) -> Vec<OnFailure> {
    let mut entries = Vec::new();
    for line in xml.lines() {
        let line = line.trim();
        if !line.starts_with("<onfailure ") {
            continue;
        }
        let action = extract_attr(line, "onfailure", "action").unwrap_or_default();
        let delay = extract_attr(line, "onfailure", "delay").unwrap_or_default();
        entries.push(OnFailure { action, delay });
    }
    entries
}
