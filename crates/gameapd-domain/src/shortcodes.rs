//! Shortcode substitution for command templates.
//!
//! Templates coming from the daemon configuration and from server commands
//! carry `{name}` placeholders filled from the server aggregate and the
//! node configuration before execution.

use crate::server::Server;
use gameapd_config::Config;

/// Build the full command line for a server action: the `{command}`
/// placeholder of the script template takes the server's own command, then
/// the whole shortcode set is substituted.
pub fn make_full_command(
    cfg: &Config,
    server: &Server,
    command_template: &str,
    server_command: &str,
) -> String {
    let command = command_template.replacen("{command}", server_command, 1);

    replace_shortcodes(&command, cfg, server)
}

/// Substitute every known shortcode. Unknown placeholders are left alone,
/// so substitution is idempotent over strings without placeholders.
pub fn replace_shortcodes(command_template: &str, cfg: &Config, server: &Server) -> String {
    let mut command = command_template.to_string();

    command = command.replace("{dir}", &server.work_dir(cfg).to_string_lossy());
    command = command.replace("{uuid}", server.uuid());
    command = command.replace("{uuid_short}", server.uuid_short());
    command = command.replace("{id}", &server.id().to_string());

    command = command.replace("{host}", &server.ip());
    command = command.replace("{ip}", &server.ip());
    command = command.replace("{port}", &server.connect_port().to_string());
    command = command.replace("{query_port}", &server.query_port().to_string());
    command = command.replace("{rcon_port}", &server.rcon_port().to_string());
    command = command.replace("{rcon_password}", &server.rcon_password());

    command = command.replace("{game}", &server.game().start_code);
    command = command.replace("{user}", &server.user());

    command = command.replace("{node_work_path}", &cfg.work_path.to_string_lossy());
    command = command.replace("{node_tools_path}", &cfg.tools_path().to_string_lossy());

    for (k, v) in server.vars() {
        command = command.replace(&format!("{{{k}}}"), &v);
    }

    command
}
