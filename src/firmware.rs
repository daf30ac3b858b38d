//! Over-the-air update: download an image over HTTP straight into a flash
//! slot and make it the next boot target.
//!
//! The flash side is abstracted by [`FirmwareSink`]. Once a slot has been
//! opened with [`FirmwareSink::begin`] it is either committed or aborted on
//! every path out of [`update`], so a failed download never leaves a half
//! written image selected for boot.

use embedded_io::ReadReady;
use embedded_io_async::{Read, Write};

use crate::error::Error;
use crate::http::{BodySink, HttpClient};

/// Largest image accepted by default.
pub const FIRMWARE_MAX_SIZE: usize = 512 * 1024;

/// Bytes read ahead to check that the server actually sends a body.
pub const OTA_PEEK_LEN: usize = 16;

/// Slice size of the streamed download, one flash write each.
pub const FLASH_CHUNK: usize = 1024;

/// Destination of a firmware image, typically the inactive OTA partition.
pub trait FirmwareSink {
    type Handle;
    type Error: core::fmt::Debug;

    /// Open the update slot for an image of `image_len` bytes.
    async fn begin(&mut self, image_len: usize) -> Result<Self::Handle, Self::Error>;

    async fn write(&mut self, handle: &mut Self::Handle, data: &[u8]) -> Result<(), Self::Error>;

    /// Validate and close the slot.
    async fn commit(&mut self, handle: &mut Self::Handle) -> Result<(), Self::Error>;

    /// Discard the slot. Never fails.
    async fn abort(&mut self, handle: Self::Handle);

    /// Boot from the committed slot on the next reset.
    async fn set_boot_partition(&mut self) -> Result<(), Self::Error>;
}

/// Download `url` into `sink` and switch the boot partition.
///
/// Returns the image size. On any error the previous boot partition stays
/// selected.
pub async fn update<T, S>(
    http: &mut HttpClient<'_, T>,
    url: &str,
    sink: &mut S,
    max_size: usize,
) -> Result<usize, Error>
where
    T: Read + Write + ReadReady,
    S: FirmwareSink,
{
    let mut tx = match http.get(url).await {
        Ok(tx) if tx.status <= 200 => tx,
        first => {
            warn!("Firmware GET failed ({:?}), retrying", first.map(|tx| tx.status));
            let tx = http.get(url).await?;
            if tx.status > 200 {
                error!("Firmware GET failed again with {}", tx.status);
                return Err(Error::Http(tx.status));
            }
            tx
        }
    };

    let mut peek = [0u8; OTA_PEEK_LEN];
    match http.read(0, &mut peek).await {
        Ok(0) => {
            warn!("Firmware image at {} is empty", url);
            return Err(Error::EmptyImage);
        }
        Ok(_) => {}
        Err(e) => {
            warn!("Firmware peek failed: {:?}", e);
            return Err(e);
        }
    }

    let image_len = tx.content_length;
    if image_len > max_size {
        error!("Firmware image of {} bytes exceeds {}", image_len, max_size);
        return Err(Error::Overflow);
    }

    info!("Downloading {} byte firmware image", image_len);
    let mut handle = sink.begin(image_len).await.map_err(|e| {
        error!("Opening the update slot failed: {:?}", e);
        Error::Firmware
    })?;

    let mut chunk = [0u8; FLASH_CHUNK];
    let mut flash = FlashWriter {
        sink: &mut *sink,
        handle: &mut handle,
        written: 0,
    };
    if let Err(e) = http.read_body(&mut tx, &mut chunk, &mut flash).await {
        sink.abort(handle).await;
        return Err(e);
    }
    if let Err(e) = sink.commit(&mut handle).await {
        error!("Committing the image failed: {:?}", e);
        sink.abort(handle).await;
        return Err(Error::Firmware);
    }

    sink.set_boot_partition().await.map_err(|e| {
        error!("Switching the boot partition failed: {:?}", e);
        Error::Firmware
    })?;
    info!("Firmware update complete, {} bytes", image_len);
    Ok(image_len)
}

/// Flash side of the body stream.
struct FlashWriter<'s, S: FirmwareSink> {
    sink: &'s mut S,
    handle: &'s mut S::Handle,
    written: usize,
}

impl<S: FirmwareSink> BodySink for FlashWriter<'_, S> {
    async fn accept(&mut self, data: &[u8]) -> Result<(), Error> {
        self.sink.write(self.handle, data).await.map_err(|e| {
            error!("Flash write at {} failed: {:?}", self.written, e);
            Error::Firmware
        })?;
        self.written += data.len();
        Ok(())
    }
}
