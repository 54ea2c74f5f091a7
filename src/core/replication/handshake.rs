// src/core/replication/handshake.rs

//! The pre-PSYNC handshake: AUTH, PING, the REPLCONF advertisements, and the
//! configured replication filters.
//!
//! Only authentication rejections are fatal here. Everything else a primary
//! might answer to the REPLCONF probes is tolerated with a warning, since
//! older primaries do not understand all of them.

use crate::config::ReplFilter;
use crate::core::RedsyncError;
use crate::core::replication::sync::Session;
use tracing::{info, warn};

impl Session<'_> {
    /// Runs the handshake steps in order.
    pub(crate) async fn establish_connection(&mut self) -> Result<(), RedsyncError> {
        self.authenticate().await?;
        self.send_ping().await?;
        self.send_listening_port().await?;
        self.send_ip_address().await?;
        self.send_capa("eof").await?;
        self.send_capa("psync2").await?;
        let filters = self.replicator.config.repl_filters.clone();
        for filter in &filters {
            self.send_filter(filter).await?;
        }
        Ok(())
    }

    async fn authenticate(&mut self) -> Result<(), RedsyncError> {
        let Some(password) = self.replicator.config.auth_password.clone() else {
            return Ok(());
        };
        match self.replicator.config.auth_user.clone() {
            Some(user) => {
                info!("AUTH {user} {}", mask(&password));
                self.send_command("AUTH", &[user.as_bytes(), password.as_bytes()])
                    .await?;
            }
            None => {
                info!("AUTH {}", mask(&password));
                self.send_command("AUTH", &[password.as_bytes()]).await?;
            }
        }
        let reply = self.read_reply_text().await?;
        info!("{reply}");
        if reply == "OK" {
            return Ok(());
        }
        if reply.contains("no password") {
            // The primary has no password configured.
            warn!("[AUTH {}] failed. {reply}", mask(&password));
            return Ok(());
        }
        Err(RedsyncError::Auth(format!(
            "[AUTH {}] failed. {reply}",
            mask(&password)
        )))
    }

    async fn send_ping(&mut self) -> Result<(), RedsyncError> {
        info!("PING");
        self.send_command("PING", &[]).await?;
        let reply = self.read_reply_text().await?;
        info!("{reply}");
        if reply.eq_ignore_ascii_case("PONG") {
            return Ok(());
        }
        if reply.contains("NOAUTH") || reply.contains("NOPERM") {
            return Err(RedsyncError::Auth(reply));
        }
        if reply.contains("operation not permitted") {
            return Err(RedsyncError::Auth("NOAUTH Authentication required.".into()));
        }
        warn!("[PING] failed. {reply}");
        Ok(())
    }

    async fn send_listening_port(&mut self) -> Result<(), RedsyncError> {
        let mut port = self.replicator.config.listening_port;
        if port == 0 {
            port = self.local_addr.port();
        }
        let port = port.to_string();
        info!("REPLCONF listening-port {port}");
        self.send_command("REPLCONF", &[b"listening-port", port.as_bytes()])
            .await?;
        let reply = self.read_reply_text().await?;
        info!("{reply}");
        if reply != "OK" {
            warn!("[REPLCONF listening-port {port}] failed. {reply}");
        }
        Ok(())
    }

    async fn send_ip_address(&mut self) -> Result<(), RedsyncError> {
        let ip = self.local_addr.ip().to_string();
        info!("REPLCONF ip-address {ip}");
        self.send_command("REPLCONF", &[b"ip-address", ip.as_bytes()])
            .await?;
        let reply = self.read_reply_text().await?;
        info!("{reply}");
        if reply != "OK" {
            // redis 3.2+
            warn!("[REPLCONF ip-address {ip}] failed. {reply}");
        }
        Ok(())
    }

    async fn send_capa(&mut self, capa: &str) -> Result<(), RedsyncError> {
        info!("REPLCONF capa {capa}");
        self.send_command("REPLCONF", &[b"capa", capa.as_bytes()])
            .await?;
        let reply = self.read_reply_text().await?;
        info!("{reply}");
        if reply != "OK" {
            warn!("[REPLCONF capa {capa}] failed. {reply}");
        }
        Ok(())
    }

    async fn send_filter(&mut self, filter: &ReplFilter) -> Result<(), RedsyncError> {
        let Some((command, args)) = filter.command.split_first() else {
            warn!("skipping replication filter with an empty command");
            return Ok(());
        };
        let info_line = filter.command.join(" ");
        info!("{info_line}");
        let arg_bytes: Vec<&[u8]> = args.iter().map(|a| a.as_bytes()).collect();
        self.send_command(command, &arg_bytes).await?;
        let reply = self.read_reply_text().await?;
        info!("{reply}");
        if reply == "OK" {
            if let Some(listener) = &filter.listener {
                // The primary accepted the filter; (re-)register its
                // listener, keeping a single registration.
                self.replicator.events.remove_listener(listener);
                self.replicator.events.add_listener(listener.clone());
            }
            return Ok(());
        }
        warn!("[{info_line}] failed. {reply}");
        Ok(())
    }
}

fn mask(_password: &str) -> &'static str {
    "******"
}
