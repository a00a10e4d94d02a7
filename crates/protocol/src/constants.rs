//! Fixed endpoints, field names and defaults of the hosting service.

/// Landing page that advertises the current upload server.
pub const DEFAULT_HOME_URL: &str = "https://gigafile.nu/";

/// Registrable domain that download pages live under (`<n>.gigafile.nu`).
pub const DEFAULT_DOMAIN: &str = "gigafile.nu";

/// Scheme used to reach the advertised upload server.
pub const DEFAULT_UPLOAD_SCHEME: &str = "https";

/// Path of the chunk upload endpoint on the upload server.
pub const UPLOAD_CHUNK_PATH: &str = "upload_chunk.php";

/// Path of the direct download endpoint, relative to the page's base URL.
pub const DOWNLOAD_PATH: &str = "download.php";

/// Server-side retention hint sent with every chunk, in days.
pub const DEFAULT_LIFETIME_DAYS: u32 = 100;

/// Marker preceding the upload server hostname in the home page script.
pub const SERVER_VAR_MARKER: &str = "var server = \"";

/// Filename reported for the chunk file part.
pub const CHUNK_PART_FILENAME: &str = "blob";

/// MIME type of the chunk file part.
pub const CHUNK_PART_MIME: &str = "application/octet-stream";

/// Query parameter naming the file identifier on the download endpoint.
pub const DOWNLOAD_FILE_PARAM: &str = "file";

/// Query parameter carrying the access key on the download endpoint.
pub const DOWNLOAD_KEY_PARAM: &str = "dlkey";

/// Multipart field names of a chunk upload.
pub mod field {
    /// Session token shared by every chunk of one upload.
    pub const TOKEN: &str = "id";
    /// Original file name.
    pub const NAME: &str = "name";
    /// Zero-based chunk index.
    pub const CHUNK: &str = "chunk";
    /// Total chunk count.
    pub const CHUNKS: &str = "chunks";
    /// Retention hint.
    pub const LIFETIME: &str = "lifetime";
    /// Chunk bytes.
    pub const FILE: &str = "file";
}
