mod gateway;
pub mod token;
pub mod validation;

pub use gateway::{IncomingFile, RejectedFile, TokenStatus, UploadReceipt, UploadTokenGateway};
pub use token::{token_expiry, IssuedToken, QuotaReservation, TokenIssuer, UploadToken};
pub use validation::FileRejection;
