//! Typed notification and response records.
//!
//! Field sets cover what the client runtime consumes; keys a server sends
//! beyond these are ignored.

use std::time::Duration;

use crate::message::message;

pub use crate::CommandError;

message! {
    /// A chat message sent to a client, channel or server.
    pub struct TextMessage {
        /// 1 private, 2 channel, 3 server.
        "targetmode" => target_mode: u8,
        "msg" => message: String,
        /// Recipient client for private messages.
        "target" => target: Option<u16>,
        "invokerid" => invoker_id: u16,
        "invokername" => invoker_name: String,
        "invokeruid" => invoker_uid: String,
    }
}

message! {
    /// A client became visible.
    pub struct ClientEnterView {
        "clid" => client_id: u16,
        "cfid" => channel_from: u64,
        "ctid" => channel_to: u64,
        "reasonid" => reason: u8,
        "client_nickname" => nickname: String,
        "client_unique_identifier" => unique_id: String,
        "client_database_id" => database_id: u64,
        "client_servergroups" => server_groups: Vec<u64>,
        "client_type" => client_type: u8,
        "client_away" => away: bool,
        "client_input_muted" => input_muted: bool,
    }
}

message! {
    /// A client left view, by disconnecting or moving out of sight.
    pub struct ClientLeftView {
        "clid" => client_id: u16,
        "cfid" => channel_from: u64,
        "ctid" => channel_to: u64,
        "reasonid" => reason: u8,
        "reasonmsg" => reason_message: Option<String>,
        "invokerid" => invoker_id: Option<u16>,
        "invokername" => invoker_name: Option<String>,
    }
}

message! {
    /// A client switched channel.
    pub struct ClientMoved {
        "clid" => client_id: u16,
        "ctid" => target_channel: u64,
        "reasonid" => reason: u8,
        "invokerid" => invoker_id: Option<u16>,
        "invokername" => invoker_name: Option<String>,
    }
}

message! {
    /// A channel was created. Confirms `channelcreate`.
    pub struct ChannelCreated {
        "cid" => channel_id: u64,
        "cpid" => parent_id: u64,
        "channel_name" => name: String,
        "channel_order" => order: u64,
        "channel_topic" => topic: Option<String>,
        "invokerid" => invoker_id: u16,
        "invokername" => invoker_name: String,
        "invokeruid" => invoker_uid: String,
    }
}

message! {
    pub struct ChannelDeleted {
        "cid" => channel_id: u64,
        "invokerid" => invoker_id: u16,
        "invokername" => invoker_name: String,
    }
}

message! {
    /// Only changed properties are present.
    pub struct ChannelEdited {
        "cid" => channel_id: u64,
        "reasonid" => reason: u8,
        "channel_name" => name: Option<String>,
        "channel_topic" => topic: Option<String>,
        "invokerid" => invoker_id: u16,
        "invokername" => invoker_name: String,
    }
}

message! {
    pub struct ChannelMoved {
        "cid" => channel_id: u64,
        "cpid" => parent_id: u64,
        "order" => order: u64,
        "invokerid" => invoker_id: u16,
        "invokername" => invoker_name: String,
    }
}

message! {
    pub struct ServerEdited {
        "reasonid" => reason: u8,
        "virtualserver_name" => name: Option<String>,
        "invokerid" => invoker_id: u16,
        "invokername" => invoker_name: String,
    }
}

message! {
    /// Server-side progress or failure report for a transfer.
    pub struct FileTransferStatus {
        "clientftfid" => client_transfer_id: u16,
        "status" => status: u32,
        "msg" => message: String,
        "size" => size: u64,
    }
}

message! {
    /// Negotiated parameters for an upload (`ftinitupload`).
    pub struct FileUpload {
        "clientftfid" => client_transfer_id: u16,
        "serverftfid" => server_transfer_id: u16,
        "ftkey" => key: String,
        "port" => port: u16,
        /// Offset the server already holds when resuming.
        "seekpos" => seek_position: u64,
    }
}

message! {
    /// Negotiated parameters for a download (`ftinitdownload`).
    pub struct FileDownload {
        "clientftfid" => client_transfer_id: u16,
        "serverftfid" => server_transfer_id: u16,
        "ftkey" => key: String,
        "port" => port: u16,
        /// Total size of the remote file.
        "size" => size: u64,
    }
}

message! {
    /// One running transfer as reported by `ftlist`.
    pub struct FileTransfer {
        "clid" => client_id: u16,
        "path" => path: String,
        "name" => name: String,
        "size" => size: u64,
        "sizedone" => size_done: u64,
        "clientftfid" => client_transfer_id: u16,
        "serverftfid" => server_transfer_id: u16,
        "sender" => sender: u64,
        "status" => status: i32,
        /// Bytes per second.
        "current_speed" => current_speed: f32,
        /// Bytes per second.
        "average_speed" => average_speed: f32,
        "runtime" => runtime: Duration,
    }
}

message! {
    /// Answer to `whoami`.
    pub struct WhoAmI {
        "client_id" => client_id: u16,
        "client_channel_id" => channel_id: u64,
        "client_nickname" => nickname: String,
        "client_database_id" => database_id: u64,
        "client_login_name" => login_name: String,
        "client_origin_server_id" => origin_server_id: u64,
        "virtualserver_id" => virtual_server_id: u64,
        "virtualserver_unique_identifier" => virtual_server_uid: String,
        "virtualserver_port" => virtual_server_port: u16,
        "virtualserver_status" => virtual_server_status: String,
    }
}

message! {
    /// One row of `clientlist`.
    pub struct ClientListEntry {
        "clid" => client_id: u16,
        "cid" => channel_id: u64,
        "client_database_id" => database_id: u64,
        "client_nickname" => nickname: String,
        "client_type" => client_type: u8,
    }
}

message! {
    /// Answer to `channelcreate`.
    pub struct ChannelId {
        "cid" => channel_id: u64,
    }
}
