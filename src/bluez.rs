//! RPC surface of the platform Bluetooth daemon.
//!
//! Media transports are owned by BlueZ; their Bluetooth sockets are obtained
//! and returned through the `org.bluez.MediaTransport1` interface on the
//! D-Bus object the daemon announced for the transport. Codec
//! reconfiguration goes through `org.bluez.MediaEndpoint1` on a remote
//! stream endpoint object.

use dbus::{
    arg::{self, PropMap, Variant},
    nonblock::{stdintf::org_freedesktop_dbus::Properties, Proxy, SyncConnection},
    Path,
};

use crate::{Result, TIMEOUT};

pub(crate) const MEDIA_TRANSPORT_INTERFACE: &str = "org.bluez.MediaTransport1";
pub(crate) const MEDIA_ENDPOINT_INTERFACE: &str = "org.bluez.MediaEndpoint1";

fn proxy<'a>(owner: &'a str, path: &'a Path<'static>, connection: &'a SyncConnection) -> Proxy<'a, &'a SyncConnection> {
    Proxy::new(owner, path, TIMEOUT, connection)
}

/// Requests the Bluetooth socket of a media transport.
///
/// `TryAcquire` is used while the transport is still pending, so that the
/// daemon does not force the stream into the streaming state. The reply
/// carries the socket as an attached file descriptor plus the read and
/// write MTUs of the link.
pub(crate) async fn acquire_transport(
    connection: &SyncConnection, owner: &str, path: &Path<'static>, try_acquire: bool,
) -> Result<(arg::OwnedFd, u16, u16)> {
    let method = if try_acquire { "TryAcquire" } else { "Acquire" };
    log::trace!("{}: {}.{} ()", path, MEDIA_TRANSPORT_INTERFACE, method);
    let (fd, mtu_read, mtu_write): (arg::OwnedFd, u16, u16) =
        proxy(owner, path, connection).method_call(MEDIA_TRANSPORT_INTERFACE, method, ()).await?;
    Ok((fd, mtu_read, mtu_write))
}

/// Gives the Bluetooth socket of a media transport back to the daemon.
///
/// When the daemon is gone or has already withdrawn the transport object
/// there is nobody left to answer; such replies count as success, because
/// the local state has to transition to released either way.
pub(crate) async fn release_transport(
    connection: &SyncConnection, owner: &str, path: &Path<'static>,
) -> Result<()> {
    log::trace!("{}: {}.Release ()", path, MEDIA_TRANSPORT_INTERFACE);
    let result: std::result::Result<(), dbus::Error> =
        proxy(owner, path, connection).method_call(MEDIA_TRANSPORT_INTERFACE, "Release", ()).await;
    match result {
        Ok(()) => Ok(()),
        Err(err) if is_soft_release_error(&err) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn is_soft_release_error(err: &dbus::Error) -> bool {
    matches!(
        err.name(),
        Some("org.freedesktop.DBus.Error.NoReply")
            | Some("org.freedesktop.DBus.Error.ServiceUnknown")
            | Some("org.freedesktop.DBus.Error.UnknownObject")
    )
}

/// Requests a codec reconfiguration on a remote stream endpoint.
pub(crate) async fn set_configuration(
    connection: &SyncConnection, owner: &str, sep_path: &Path<'static>, configuration: &[u8],
) -> Result<()> {
    log::trace!(
        "{}: {}.SetConfiguration ({})",
        sep_path,
        MEDIA_ENDPOINT_INTERFACE,
        hex::encode(configuration)
    );
    let mut props = PropMap::new();
    props
        .insert("Capabilities".to_string(), Variant(Box::new(configuration.to_vec()) as Box<dyn arg::RefArg>));
    proxy(owner, sep_path, connection).method_call::<(), _, _, _>(MEDIA_ENDPOINT_INTERFACE, "SetConfiguration", (props,)).await?;
    Ok(())
}

/// Sets the `Volume` property of a media transport.
pub(crate) async fn set_transport_volume(
    connection: &SyncConnection, owner: &str, path: &Path<'static>, volume: u16,
) -> Result<()> {
    log::trace!("{}: {}.Volume := {}", path, MEDIA_TRANSPORT_INTERFACE, volume);
    proxy(owner, path, connection).set(MEDIA_TRANSPORT_INTERFACE, "Volume", volume).await?;
    Ok(())
}
