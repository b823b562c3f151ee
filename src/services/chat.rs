use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{InputFile, InputMedia, InputMediaPhoto, MessageId};

use crate::generation::MessageHandle;
use crate::utils::telegram::{inline_keyboard, with_telegram_retry};

const MEDIA_GROUP_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionButton {
    pub label: String,
    pub callback_data: String,
}

impl ActionButton {
    pub fn new(label: impl Into<String>, callback_data: impl Into<String>) -> Self {
        ActionButton {
            label: label.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Outbound chat operations used by the generation core.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(
        &self,
        user_id: i64,
        text: &str,
        actions: &[ActionButton],
    ) -> Result<MessageHandle>;

    async fn send_photos(
        &self,
        user_id: i64,
        photos: Vec<Vec<u8>>,
        caption: Option<&str>,
    ) -> Result<()>;

    async fn edit_text(&self, handle: MessageHandle, text: &str) -> Result<()>;
}

#[derive(Debug, PartialEq)]
enum PhotoBatch<'a> {
    Single(&'a [u8]),
    Group(&'a [Vec<u8>]),
}

/// Media groups hold 2..=10 photos; a lone photo, including a one-photo
/// tail, goes out on its own.
fn photo_batches(photos: &[Vec<u8>]) -> Vec<PhotoBatch<'_>> {
    photos
        .chunks(MEDIA_GROUP_LIMIT)
        .map(|chunk| match chunk {
            [photo] => PhotoBatch::Single(photo),
            group => PhotoBatch::Group(group),
        })
        .collect()
}

#[derive(Clone)]
pub struct TelegramChat {
    bot: Bot,
}

impl TelegramChat {
    pub fn new(bot: Bot) -> Self {
        TelegramChat { bot }
    }
}

fn handle_of(message: &Message) -> MessageHandle {
    MessageHandle {
        chat_id: message.chat.id.0,
        message_id: message.id.0,
    }
}

#[async_trait]
impl ChatTransport for TelegramChat {
    async fn send_text(
        &self,
        user_id: i64,
        text: &str,
        actions: &[ActionButton],
    ) -> Result<MessageHandle> {
        let chat_id = ChatId(user_id);
        let markup = (!actions.is_empty()).then(|| inline_keyboard(actions));
        let message = with_telegram_retry("send_message", || {
            let mut request = self.bot.send_message(chat_id, text.to_string());
            if let Some(markup) = markup.clone() {
                request = request.reply_markup(markup);
            }
            async move { request.await }
        })
        .await?;
        Ok(handle_of(&message))
    }

    async fn send_photos(
        &self,
        user_id: i64,
        photos: Vec<Vec<u8>>,
        caption: Option<&str>,
    ) -> Result<()> {
        let chat_id = ChatId(user_id);
        for (batch_index, batch) in photo_batches(&photos).into_iter().enumerate() {
            let caption = caption.filter(|_| batch_index == 0);
            match batch {
                PhotoBatch::Single(photo) => {
                    with_telegram_retry("send_photo", || {
                        let input = InputFile::memory(photo.to_vec()).file_name("avatar.png");
                        let mut request = self.bot.send_photo(chat_id, input);
                        if let Some(caption) = caption {
                            request = request.caption(caption.to_string());
                        }
                        async move { request.await }
                    })
                    .await?;
                }
                PhotoBatch::Group(group) => {
                    with_telegram_retry("send_media_group", || {
                        let media = group
                            .iter()
                            .enumerate()
                            .map(|(index, bytes)| {
                                let file = InputFile::memory(bytes.clone())
                                    .file_name(format!("variant_{}.png", index + 1));
                                let mut photo = InputMediaPhoto::new(file);
                                if index == 0 {
                                    if let Some(caption) = caption {
                                        photo = photo.caption(caption.to_string());
                                    }
                                }
                                InputMedia::Photo(photo)
                            })
                            .collect::<Vec<_>>();
                        let request = self.bot.send_media_group(chat_id, media);
                        async move { request.await }
                    })
                    .await?;
                }
            }
        }
        Ok(())
    }

    async fn edit_text(&self, handle: MessageHandle, text: &str) -> Result<()> {
        let chat_id = ChatId(handle.chat_id);
        let message_id = MessageId(handle.message_id);
        with_telegram_retry("edit_message_text", || {
            let request = self
                .bot
                .edit_message_text(chat_id, message_id, text.to_string());
            async move { request.await }
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photos(count: usize) -> Vec<Vec<u8>> {
        (0..count).map(|index| vec![index as u8]).collect()
    }

    fn sizes(batches: &[PhotoBatch<'_>]) -> Vec<(bool, usize)> {
        batches
            .iter()
            .map(|batch| match batch {
                PhotoBatch::Single(_) => (true, 1),
                PhotoBatch::Group(group) => (false, group.len()),
            })
            .collect()
    }

    #[test]
    fn single_photo_is_not_a_group() {
        assert_eq!(sizes(&photo_batches(&photos(1))), vec![(true, 1)]);
        assert!(photo_batches(&[]).is_empty());
    }

    #[test]
    fn one_photo_tail_is_sent_alone() {
        let eleven = photos(11);
        let batches = photo_batches(&eleven);
        assert_eq!(sizes(&batches), vec![(false, 10), (true, 1)]);
        assert_eq!(batches[1], PhotoBatch::Single(&[10u8][..]));
        assert_eq!(sizes(&photo_batches(&photos(12))), vec![(false, 10), (false, 2)]);
    }
}
