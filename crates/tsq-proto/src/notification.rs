//! Notification types, their registry and the notification sum type.

use std::collections::HashMap;

use crate::message::RawRecord;
use crate::schema;

macro_rules! notifications {
    ($( $(#[$doc:meta])* $variant:ident => $wire:literal ),* $(,)?) => {
        /// Tag identifying the kind of an inbound notification line.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum NotificationType {
            $( $(#[$doc])* $variant, )*
        }

        impl NotificationType {
            /// Every known notification type.
            pub const ALL: &'static [Self] = &[$( Self::$variant, )*];

            /// Leading token used on the wire.
            #[must_use]
            pub const fn wire_name(self) -> &'static str {
                match self {
                    $( Self::$variant => $wire, )*
                }
            }
        }

        /// A decoded notification line: every record it carried, typed.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Notification {
            $( $(#[$doc])* $variant(Vec<schema::$variant>), )*
        }

        impl Notification {
            /// The tag of this notification.
            #[must_use]
            pub const fn notification_type(&self) -> NotificationType {
                match self {
                    $( Self::$variant(_) => NotificationType::$variant, )*
                }
            }

            /// Number of records carried.
            #[must_use]
            pub fn len(&self) -> usize {
                match self {
                    $( Self::$variant(records) => records.len(), )*
                }
            }

            pub(crate) fn from_records(kind: NotificationType, records: &[RawRecord<'_>]) -> Self {
                match kind {
                    $( NotificationType::$variant => Self::$variant(crate::deserializer::bind_all(records)), )*
                }
            }
        }
    };
}

notifications! {
    /// A status line; unsolicited when it carries no return code.
    CommandError => "error",
    TextMessage => "notifytextmessage",
    ClientEnterView => "notifycliententerview",
    ClientLeftView => "notifyclientleftview",
    ClientMoved => "notifyclientmoved",
    ChannelCreated => "notifychannelcreated",
    ChannelDeleted => "notifychanneldeleted",
    ChannelEdited => "notifychanneledited",
    ChannelMoved => "notifychannelmoved",
    ServerEdited => "notifyserveredited",
    FileTransferStatus => "notifystatusfiletransfer",
    FileUpload => "notifystartupload",
    FileDownload => "notifystartdownload",
    FileTransfer => "notifyfiletransferlist",
}

impl Notification {
    /// Whether the notification carries no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Maps leading tokens to notification types.
///
/// Built once per connection and shared with the components that classify
/// lines.
#[derive(Debug, Clone, Default)]
pub struct NotificationRegistry {
    by_name: HashMap<&'static str, NotificationType>,
}

impl NotificationRegistry {
    /// A registry with no entries; every line classifies as data or status.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry with every type in [`NotificationType::ALL`].
    #[must_use]
    pub fn query() -> Self {
        NotificationType::ALL
            .iter()
            .fold(Self::empty(), |registry, kind| registry.with(*kind))
    }

    /// Adds one type under its wire name.
    #[must_use]
    pub fn with(mut self, kind: NotificationType) -> Self {
        self.by_name.insert(kind.wire_name(), kind);
        self
    }

    /// Looks up a leading token.
    #[must_use]
    pub fn lookup(&self, token: &str) -> Option<NotificationType> {
        self.by_name.get(token).copied()
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether no types are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
