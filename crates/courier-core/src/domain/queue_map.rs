//! QueueMap - queue ごとの順序付きコレクション

/// QueueMap は queue 識別子 → 要素列 の対応
///
/// # 順序
/// - queue は最初に挿入された順（呼び出し側の queue リスト順）
/// - queue 内の要素も挿入順
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMap<T> {
    entries: Vec<(String, Vec<T>)>,
}

/// 1 パスで取得したメッセージ
pub type QueueMessages = QueueMap<super::Message>;

/// 削除が確認された body（転送対象）
pub type QueueBodies = QueueMap<String>;

impl<T> QueueMap<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// `queue_urls` すべてを空リストで持つ map
    pub fn with_queues<S: AsRef<str>>(queue_urls: &[S]) -> Self {
        let mut map = Self::new();
        for queue_url in queue_urls {
            map.entry_mut(queue_url.as_ref());
        }
        map
    }

    /// `queue_url` のリスト。なければ末尾に空で作る
    pub fn entry_mut(&mut self, queue_url: &str) -> &mut Vec<T> {
        let pos = match self.entries.iter().position(|(q, _)| q == queue_url) {
            Some(pos) => pos,
            None => {
                self.entries.push((queue_url.to_string(), Vec::new()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[pos].1
    }

    pub fn push(&mut self, queue_url: &str, item: T) {
        self.entry_mut(queue_url).push(item);
    }

    pub fn get(&self, queue_url: &str) -> Option<&[T]> {
        self.entries
            .iter()
            .find(|(q, _)| q == queue_url)
            .map(|(_, items)| items.as_slice())
    }

    pub fn contains_queue(&self, queue_url: &str) -> bool {
        self.get(queue_url).is_some()
    }

    pub fn queue_urls(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(q, _)| q.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[T])> {
        self.entries
            .iter()
            .map(|(q, items)| (q.as_str(), items.as_slice()))
    }

    pub fn queue_count(&self) -> usize {
        self.entries.len()
    }

    /// 全 queue の要素数
    pub fn total_items(&self) -> usize {
        self.entries.iter().map(|(_, items)| items.len()).sum()
    }

    pub fn has_items(&self) -> bool {
        self.entries.iter().any(|(_, items)| !items.is_empty())
    }
}

impl<T> Default for QueueMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IntoIterator for QueueMap<T> {
    type Item = (String, Vec<T>);
    type IntoIter = std::vec::IntoIter<(String, Vec<T>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
