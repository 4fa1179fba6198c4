//! Convenience builders over [`Client::send`].

use tsq_proto::schema::{
    ChannelCreated, ChannelId, ClientListEntry, FileDownload, FileTransfer, FileUpload, WhoAmI,
};
use tsq_proto::{Command, CommandError, ErrorCode, Notification, NotificationType, Record, WireValue};

use super::{Client, Response};
use crate::ClientError;

/// Recipient of a text message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTarget {
    /// A single client.
    Client(u16),
    /// The channel the query client sits in.
    Channel,
    /// The whole virtual server.
    Server,
}

impl MessageTarget {
    const fn mode(self) -> u8 {
        match self {
            Self::Client(_) => 1,
            Self::Channel => 2,
            Self::Server => 3,
        }
    }
}

/// Scope of a kick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KickReason {
    /// Move the client to the default channel.
    Channel,
    /// Disconnect the client from the server.
    Server,
}

impl KickReason {
    const fn id(self) -> u8 {
        match self {
            Self::Channel => 4,
            Self::Server => 5,
        }
    }
}

impl Client {
    /// Identity of the query session.
    ///
    /// # Errors
    ///
    /// See [`Client::send_first`].
    pub fn whoami(&self) -> Result<WhoAmI, ClientError> {
        self.send_first(&Command::new("whoami"))
    }

    /// Every client on the selected virtual server.
    ///
    /// # Errors
    ///
    /// See [`Client::send`].
    pub fn client_list(&self) -> Result<Vec<ClientListEntry>, ClientError> {
        self.send_typed(&Command::new("clientlist"))
    }

    /// Sends a chat message.
    ///
    /// # Errors
    ///
    /// See [`Client::send`].
    pub fn send_text_message(&self, target: MessageTarget, message: &str) -> Result<(), ClientError> {
        let target_id = match target {
            MessageTarget::Client(id) => u64::from(id),
            MessageTarget::Channel | MessageTarget::Server => 0,
        };
        let command = Command::new("sendtextmessage")
            .with_param("targetmode", target.mode())
            .with_param("target", target_id)
            .with_param("msg", message);
        self.send(&command).map(drop)
    }

    /// Kicks one or more clients.
    ///
    /// # Errors
    ///
    /// See [`Client::send`].
    pub fn kick_client(
        &self,
        client_ids: &[u16],
        reason: KickReason,
        message: Option<&str>,
    ) -> Result<(), ClientError> {
        let command = Command::new("clientkick")
            .with_param("reasonid", reason.id())
            .with_optional("reasonmsg", message)
            .with_multi("clid", client_ids.iter().copied());
        self.send(&command).map(drop)
    }

    /// Pokes a client with a popup message.
    ///
    /// # Errors
    ///
    /// See [`Client::send`].
    pub fn poke_client(&self, client_id: u16, message: &str) -> Result<(), ClientError> {
        let command = Command::new("clientpoke")
            .with_param("clid", client_id)
            .with_param("msg", message);
        self.send(&command).map(drop)
    }

    /// Authenticates the query session.
    ///
    /// # Errors
    ///
    /// See [`Client::send`].
    pub fn login(&self, username: &str, password: &str) -> Result<(), ClientError> {
        let command = Command::new("login")
            .with_param("client_login_name", username)
            .with_param("client_login_password", password);
        self.send(&command).map(drop)
    }

    /// Selects a virtual server by id.
    ///
    /// # Errors
    ///
    /// See [`Client::send`].
    pub fn use_server(&self, server_id: u64) -> Result<(), ClientError> {
        self.send(&Command::new("use").with_param("sid", server_id))
            .map(drop)
    }

    /// Subscribes the session to a server event group such as `server`,
    /// `channel` or `textprivate`.
    ///
    /// # Errors
    ///
    /// See [`Client::send`].
    pub fn register_notification(
        &self,
        event: &str,
        channel_id: Option<u64>,
    ) -> Result<(), ClientError> {
        let command = Command::new("servernotifyregister")
            .with_param("event", event)
            .with_optional("id", channel_id);
        self.send(&command).map(drop)
    }

    /// Creates a channel and waits for the server to confirm it with a
    /// channel-created notification.
    ///
    /// # Errors
    ///
    /// See [`Client::send_depending`].
    pub fn channel_create(&self, name: &str, parent: Option<u64>) -> Result<ChannelCreated, ClientError> {
        let command = Command::new("channelcreate")
            .with_param("channel_name", name)
            .with_optional("cpid", parent);
        let response = self.send_depending(&command, NotificationType::ChannelCreated)?;
        let created_id = response.first::<ChannelId>().map(|id| id.channel_id);
        match response.notification().map(|notification| &**notification) {
            Some(Notification::ChannelCreated(records)) => records
                .iter()
                .find(|record| created_id.is_none_or(|id| id == record.channel_id))
                .or_else(|| records.first())
                .cloned()
                .ok_or_else(|| ClientError::EmptyResponse {
                    command: command.name().to_owned(),
                }),
            _ => Err(ClientError::EmptyResponse {
                command: command.name().to_owned(),
            }),
        }
    }

    /// Negotiates an upload.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Command`] when the server refuses the
    /// transfer, including refusals reported inside the data line.
    #[expect(clippy::too_many_arguments, reason = "mirrors the wire command")]
    pub fn ft_init_upload(
        &self,
        client_transfer_id: u16,
        path: &str,
        channel_id: u64,
        channel_password: Option<&str>,
        size: u64,
        overwrite: bool,
        resume: bool,
    ) -> Result<FileUpload, ClientError> {
        let command = Command::new("ftinitupload")
            .with_param("clientftfid", client_transfer_id)
            .with_param("name", path)
            .with_param("cid", channel_id)
            .with_param("cpw", channel_password.unwrap_or_default())
            .with_param("size", size)
            .with_param("overwrite", overwrite)
            .with_param("resume", resume);
        transfer_reply(&command, &self.send(&command)?)
    }

    /// Negotiates a download starting at `seek_position`.
    ///
    /// # Errors
    ///
    /// See [`Client::ft_init_upload`].
    pub fn ft_init_download(
        &self,
        client_transfer_id: u16,
        path: &str,
        channel_id: u64,
        channel_password: Option<&str>,
        seek_position: u64,
    ) -> Result<FileDownload, ClientError> {
        let command = Command::new("ftinitdownload")
            .with_param("clientftfid", client_transfer_id)
            .with_param("name", path)
            .with_param("cid", channel_id)
            .with_param("cpw", channel_password.unwrap_or_default())
            .with_param("seekpos", seek_position);
        transfer_reply(&command, &self.send(&command)?)
    }

    /// Stops a running transfer, optionally deleting the partial file.
    ///
    /// # Errors
    ///
    /// See [`Client::send`].
    pub fn ft_stop(&self, server_transfer_id: u16, delete: bool) -> Result<(), ClientError> {
        let command = Command::new("ftstop")
            .with_param("serverftfid", server_transfer_id)
            .with_param("delete", delete);
        self.send(&command).map(drop)
    }

    /// Lists running transfers.
    ///
    /// # Errors
    ///
    /// See [`Client::send`]; an empty list is reported by the server as
    /// [`ErrorCode::DATABASE_EMPTY_RESULT`].
    pub fn ft_list(&self) -> Result<Vec<FileTransfer>, ClientError> {
        self.send_typed(&Command::new("ftlist"))
    }
}

/// Transfer negotiation can fail inside an ok answer: the data line then
/// carries `status` and `msg` instead of a key.
fn transfer_reply<T: tsq_proto::Message>(command: &Command, response: &Response) -> Result<T, ClientError> {
    let record: Record = response.first().ok_or_else(|| ClientError::EmptyResponse {
        command: command.name().to_owned(),
    })?;
    if record.get("ftkey").is_none()
        && let Some(status) = record.get("status")
    {
        let id = ErrorCode::parse_wire(status).unwrap_or(ErrorCode::CUSTOM_ERROR);
        let mut error = CommandError::custom(record.get("msg").unwrap_or_default());
        error.id = id;
        return Err(ClientError::Command(error));
    }
    response.first().ok_or_else(|| ClientError::EmptyResponse {
        command: command.name().to_owned(),
    })
}
