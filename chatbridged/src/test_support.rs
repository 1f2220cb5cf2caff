//! Scripted stand-in for the chat backend, served over loopback pipes.

use crate::adapters::transport::LoopbackPeer;
use crate::app::bridge::ReplyTimings;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::sleep;

pub const FAST_TICK: Duration = Duration::from_millis(5);

pub fn fast_timings() -> ReplyTimings {
    ReplyTimings {
        quiet: Duration::from_millis(60),
        max: Duration::from_millis(1500),
        group_list_max: Duration::from_millis(1000),
    }
}

const MENU: &str = "\nMENU:\n1. Enviar mensaje a usuario\n2. Crear grupo\n3. Enviar mensaje a grupo\n4. Salir\n7. Ver historial privado\n8. Ver historial de grupo\n9. Listar mis grupos\nElige opción:\n";

#[derive(Clone, Default)]
pub struct BackendLog {
    logins: Arc<Mutex<Vec<String>>>,
    commands: Arc<Mutex<HashMap<String, Vec<String>>>>,
}

impl BackendLog {
    pub fn logins(&self) -> Vec<String> {
        self.logins.lock().unwrap().clone()
    }

    /// Lines received from `user` after its login line.
    pub fn commands(&self, user: &str) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .get(user)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, user: &str, line: &str) {
        self.commands
            .lock()
            .unwrap()
            .entry(user.to_string())
            .or_default()
            .push(line.to_string());
    }
}

type Groups = Arc<Mutex<BTreeMap<String, BTreeSet<String>>>>;

/// How the scripted backend spreads a reply over writes. The default sends
/// each reply and its menu in one write, immediately.
#[derive(Clone, Copy, Debug, Default)]
pub struct Pacing {
    /// Pause before a reply's body.
    pub reply_delay: Duration,
    /// When non-zero, the menu follows the body as a separate write after
    /// this pause.
    pub menu_delay: Duration,
}

/// Serve every loopback connection with the menu protocol. Only `known`
/// users can receive private messages.
pub fn spawn_menu_backend(
    peers: mpsc::UnboundedReceiver<LoopbackPeer>,
    known: &[&str],
) -> BackendLog {
    spawn_paced_menu_backend(peers, known, Pacing::default())
}

pub fn spawn_paced_menu_backend(
    mut peers: mpsc::UnboundedReceiver<LoopbackPeer>,
    known: &[&str],
    pacing: Pacing,
) -> BackendLog {
    let log = BackendLog::default();
    let known: Arc<BTreeSet<String>> = Arc::new(known.iter().map(|u| u.to_string()).collect());
    let groups: Groups = Arc::default();
    let accept_log = log.clone();
    tokio::spawn(async move {
        while let Some(peer) = peers.recv().await {
            tokio::spawn(serve_peer(
                peer,
                accept_log.clone(),
                known.clone(),
                groups.clone(),
                pacing,
            ));
        }
    });
    log
}

async fn serve_peer(
    peer: LoopbackPeer,
    log: BackendLog,
    known: Arc<BTreeSet<String>>,
    groups: Groups,
    pacing: Pacing,
) {
    let (reader, mut writer) = tokio::io::split(peer.stream);
    let mut lines = BufReader::new(reader).lines();
    if writer.write_all(b"Ingresa tu nombre:\n").await.is_err() {
        return;
    }
    let Ok(Some(name)) = lines.next_line().await else {
        return;
    };
    log.logins.lock().unwrap().push(name.clone());
    let greeting = format!("¡Hola {name}! Bienvenido al chat.\n");
    if deliver(&mut writer, &greeting, pacing).await.is_err() {
        return;
    }

    while let Ok(Some(choice)) = lines.next_line().await {
        log.record(&name, &choice);
        let mut out = String::new();
        match choice.trim() {
            "1" => {
                prompt(&mut out, "¿A qué usuario deseas enviar el mensaje?");
                let Some(to) = next(&mut lines, &log, &name).await else { return };
                prompt(&mut out, "Escribe tu mensaje:");
                let Some(_message) = next(&mut lines, &log, &name).await else { return };
                if known.contains(&to) {
                    out.push_str("Mensaje enviado correctamente.\n");
                } else {
                    out.push_str("Usuario no encontrado o inválido.\n");
                }
            }
            "2" => {
                prompt(&mut out, "Nombre del grupo:");
                let Some(group) = next(&mut lines, &log, &name).await else { return };
                out.push_str(&format!("Grupo '{group}' creado.\n"));
                prompt(&mut out, "Escribe los nombres de los usuarios a agregar (separados por coma):");
                let Some(members) = next(&mut lines, &log, &name).await else { return };
                let mut table = groups.lock().unwrap();
                let entry = table.entry(group.clone()).or_default();
                entry.insert(name.clone());
                for member in members.split(',').map(str::trim).filter(|m| !m.is_empty()) {
                    entry.insert(member.to_string());
                }
                out.push_str(&format!("Miembros actuales del grupo '{group}':\n"));
                for member in entry.iter() {
                    out.push_str(&format!(" - {member}\n"));
                }
            }
            "3" => {
                prompt(&mut out, "Nombre del grupo al que deseas enviar mensaje:");
                let Some(group) = next(&mut lines, &log, &name).await else { return };
                if !groups.lock().unwrap().contains_key(&group) {
                    out.push_str("Grupo no encontrado.\n");
                } else {
                    prompt(&mut out, "Escribe tu mensaje:");
                    let Some(_message) = next(&mut lines, &log, &name).await else { return };
                    out.push_str("Mensaje enviado al grupo correctamente.\n");
                }
            }
            "7" => {
                prompt(&mut out, "¿De qué usuario quieres ver el historial?");
                let Some(other) = next(&mut lines, &log, &name).await else { return };
                out.push_str(&format!("No hay historial con {other}\n"));
            }
            "8" => {
                prompt(&mut out, "¿De qué grupo quieres ver el historial?");
                let Some(group) = next(&mut lines, &log, &name).await else { return };
                out.push_str(&format!("No hay historial para el grupo {group}\n"));
            }
            "9" => {
                let mine: Vec<String> = groups
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|(_, members)| members.contains(&name))
                    .map(|(group, _)| group.clone())
                    .collect();
                if mine.is_empty() {
                    out.push_str("No perteneces a ningún grupo.\n");
                } else {
                    out.push_str("Tus grupos:\n");
                    for group in mine {
                        out.push_str(&format!("- {group}\n"));
                    }
                }
                out.push_str("=== FIN LISTA GRUPOS ===\n");
            }
            "EXIT" => {
                let _ = writer.write_all(b"Desconectando...\n").await;
                return;
            }
            _ => out.push_str("Comando o número no válido.\n"),
        }
        if deliver(&mut writer, &out, pacing).await.is_err() {
            return;
        }
    }
}

async fn deliver<W>(writer: &mut W, body: &str, pacing: Pacing) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if !pacing.reply_delay.is_zero() {
        sleep(pacing.reply_delay).await;
    }
    if pacing.menu_delay.is_zero() {
        return writer.write_all(format!("{body}{MENU}").as_bytes()).await;
    }
    writer.write_all(body.as_bytes()).await?;
    sleep(pacing.menu_delay).await;
    writer.write_all(MENU.as_bytes()).await
}

fn prompt(out: &mut String, text: &str) {
    out.push_str(text);
    out.push('\n');
}

async fn next<R>(
    lines: &mut tokio::io::Lines<BufReader<R>>,
    log: &BackendLog,
    user: &str,
) -> Option<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let line = lines.next_line().await.ok().flatten()?;
    log.record(user, &line);
    Some(line)
}
