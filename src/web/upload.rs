use actix_multipart::{Multipart, MultipartError};
use futures::StreamExt;

pub const PDF_MEDIA_TYPE: &str = "application/pdf";

/// The `pdf` field of an analysis form.
#[derive(Debug)]
pub struct PdfUpload {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl PdfUpload {
    pub fn is_pdf(&self) -> bool {
        self.content_type.as_deref() == Some(PDF_MEDIA_TYPE)
    }
}

/// Reads the whole form, keeping the first field named `pdf` and draining the rest.
pub async fn read_pdf_field(mut payload: Multipart) -> Result<Option<PdfUpload>, MultipartError> {
    let mut upload: Option<PdfUpload> = None;

    while let Some(field) = payload.next().await {
        let mut field = field?;
        let wanted = upload.is_none() && field.content_disposition().get_name() == Some("pdf");

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk?;
            if wanted {
                data.extend_from_slice(&chunk);
            }
        }

        if wanted {
            upload = Some(PdfUpload {
                filename: field
                    .content_disposition()
                    .get_filename()
                    .map(str::to_string),
                content_type: field.content_type().map(|mime| mime.to_string()),
                data,
            });
        }
    }

    Ok(upload)
}
