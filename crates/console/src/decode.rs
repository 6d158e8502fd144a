/// 流式文本解码器。
///
/// 后端以任意字节块推送 UTF-8 文本：一个多字节字符可能被切在两个块之间，
/// 一行也可能跨多个块。解码状态在块之间显式保留：
/// `pending` 缓存尚不完整的多字节序列，`carry` 缓存尚未遇到换行的行尾。
/// 对同一字节序列，无论如何分块，产出的行序列完全一致。
pub struct StreamDecoder {
    pending: Vec<u8>,
    carry: String,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            carry: String::new(),
        }
    }

    /// 送入一个字节块，返回块内解码完成的整行（不含行尾换行符）。
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    text.push_str(s);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // 末尾是被截断的多字节序列，留给下一个块
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        // 真正的非法字节，替换后继续
                        Some(n) => {
                            text.push('\u{FFFD}');
                            self.pending.drain(..valid + n);
                        }
                    }
                }
            }
        }

        self.split_lines(&text)
    }

    fn split_lines(&mut self, text: &str) -> Vec<String> {
        self.carry.push_str(text);
        let mut lines = Vec::new();
        while let Some(pos) = self.carry.find('\n') {
            let rest = self.carry.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.carry, rest);
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// 流结束：取出残余缓冲作为最后一行（可能没有换行符结尾）。
    pub fn finish(mut self) -> Option<String> {
        if !self.pending.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending).into_owned();
            self.carry.push_str(&tail);
        }
        if self.carry.is_empty() {
            return None;
        }
        let mut line = self.carry;
        if line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}
