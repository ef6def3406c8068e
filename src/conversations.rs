use crate::models::{Conversation, ConversationId};

/// Sidebar list of conversations, newest first as the server orders them.
#[derive(Debug, Default, Clone)]
pub struct ConversationList {
    items: Vec<Conversation>,
}

/// A conversation removed optimistically, kept so it can be put back.
#[derive(Debug, Clone)]
pub struct RemovedConversation {
    pub id: ConversationId,
    removed: Option<(usize, Conversation)>,
}

impl ConversationList {
    pub fn items(&self) -> &[Conversation] {
        &self.items
    }

    pub fn get(&self, id: ConversationId) -> Option<&Conversation> {
        self.items.iter().find(|c| c.id == id)
    }

    /// Replaces the list with a server snapshot, leaving out ids for which
    /// `hidden` returns true.
    pub fn replace<F>(&mut self, conversations: Vec<Conversation>, hidden: F)
    where
        F: Fn(ConversationId) -> bool,
    {
        self.items = conversations.into_iter().filter(|c| !hidden(c.id)).collect();
    }

    pub fn insert_front(&mut self, conversation: Conversation) {
        self.items.retain(|c| c.id != conversation.id);
        self.items.insert(0, conversation);
    }

    pub fn remove(&mut self, id: ConversationId) -> RemovedConversation {
        let removed = self
            .items
            .iter()
            .position(|c| c.id == id)
            .map(|index| (index, self.items.remove(index)));
        RemovedConversation { id, removed }
    }

    /// Puts a removed conversation back where it was. The index is clamped
    /// in case the list shrank in the meantime.
    pub fn restore(&mut self, removed: RemovedConversation) {
        let Some((index, conversation)) = removed.removed else {
            return;
        };
        if self.get(conversation.id).is_some() {
            return;
        }
        let index = index.min(self.items.len());
        self.items.insert(index, conversation);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn convo(id: ConversationId) -> Conversation {
        Conversation {
            id,
            title: format!("chat {}", id),
            created_at: Utc::now(),
        }
    }

    fn ids(list: &ConversationList) -> Vec<ConversationId> {
        list.items().iter().map(|c| c.id).collect()
    }

    #[test]
    fn restore_returns_to_prior_position() {
        let mut list = ConversationList::default();
        list.replace(vec![convo(3), convo(2), convo(1)], |_| false);

        let removed = list.remove(2);
        assert_eq!(ids(&list), vec![3, 1]);
        list.restore(removed);
        assert_eq!(ids(&list), vec![3, 2, 1]);
    }

    #[test]
    fn restore_clamps_when_list_shrank() {
        let mut list = ConversationList::default();
        list.replace(vec![convo(3), convo(2), convo(1)], |_| false);
        let removed = list.remove(1);
        list.remove(3);
        list.restore(removed);
        assert_eq!(ids(&list), vec![2, 1]);
    }

    #[test]
    fn removing_unknown_id_restores_nothing() {
        let mut list = ConversationList::default();
        list.replace(vec![convo(1)], |_| false);
        let removed = list.remove(9);
        list.restore(removed);
        assert_eq!(ids(&list), vec![1]);
    }

    #[test]
    fn replace_skips_hidden_and_insert_front_dedupes() {
        let mut list = ConversationList::default();
        list.replace(vec![convo(3), convo(2), convo(1)], |id| id == 2);
        assert_eq!(ids(&list), vec![3, 1]);
        list.insert_front(convo(1));
        assert_eq!(ids(&list), vec![1, 3]);
    }
}
