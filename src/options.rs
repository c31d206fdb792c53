//! Open and extraction options.

/// Options recognized when opening an archive.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Password for encrypted archives.
    ///
    /// Recorded for callers that route encrypted archives elsewhere;
    /// decryption itself is outside the scope of this crate, so encrypted
    /// entries still fail with
    /// [`Error::PasswordRequired`](crate::Error::PasswordRequired).
    pub password: Option<String>,
    /// Leave the underlying stream open when the archive is closed.
    ///
    /// By default the archive owns its stream and releases it on close or
    /// drop. With `leave_open` the stream is treated as borrowed: close
    /// invalidates the archive's entries but hands the stream back to the
    /// caller untouched.
    pub leave_open: bool,
}

impl OpenOptions {
    /// Creates open options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the password for encrypted archives.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Marks the source stream as borrowed.
    pub fn leave_open(mut self, leave_open: bool) -> Self {
        self.leave_open = leave_open;
        self
    }
}

/// Options for extraction to a destination.
///
/// # Example
///
/// ```rust
/// use unarc::ExtractionOptions;
///
/// let options = ExtractionOptions::new()
///     .overwrite(true)
///     .preserve_timestamp(true);
/// assert!(options.extract_full_path);
/// ```
#[derive(Debug, Clone)]
pub struct ExtractionOptions {
    /// Recreate the entry's directory structure under the destination
    /// root. When false, all entries land flat in the root under their
    /// file name.
    pub extract_full_path: bool,
    /// Replace existing files. When false, an existing destination path
    /// fails that entry with [`Error::Collision`](crate::Error::Collision).
    pub overwrite: bool,
    /// Restore platform attribute bits after the content is written.
    ///
    /// A no-op on platforms without matching attribute bits, and for
    /// entries that carry none.
    pub preserve_attributes: bool,
    /// Restore the recorded modification time after the content is
    /// written.
    pub preserve_timestamp: bool,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            extract_full_path: true,
            overwrite: false,
            preserve_attributes: false,
            preserve_timestamp: false,
        }
    }
}

impl ExtractionOptions {
    /// Creates extraction options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether directory structure is recreated.
    pub fn extract_full_path(mut self, extract_full_path: bool) -> Self {
        self.extract_full_path = extract_full_path;
        self
    }

    /// Sets whether existing files are replaced.
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Sets whether attribute bits are restored.
    pub fn preserve_attributes(mut self, preserve: bool) -> Self {
        self.preserve_attributes = preserve;
        self
    }

    /// Sets whether modification times are restored.
    pub fn preserve_timestamp(mut self, preserve: bool) -> Self {
        self.preserve_timestamp = preserve;
        self
    }
}
