// 该文件是 Guanlan （观澜） 项目的一部分。
// src/process.rs - 外部进程辅助
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::io::Read;
use std::process::ChildStderr;
use std::thread::JoinHandle;

use tracing::warn;

/// 在后台线程中持续读取子进程的标准错误
///
/// 管道写满时子进程会阻塞，所以读取不能等到进程退出。
pub(crate) struct StderrDrain {
  handle: Option<JoinHandle<String>>,
}

impl StderrDrain {
  pub(crate) fn spawn(stderr: Option<ChildStderr>) -> Self {
    let handle = stderr.map(|mut stderr| {
      std::thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Err(e) = stderr.read_to_end(&mut buffer) {
          warn!("读取子进程错误输出失败: {}", e);
        }
        String::from_utf8_lossy(&buffer).trim().to_string()
      })
    });
    Self { handle }
  }

  /// 等待管道关闭并取出全部内容，只在子进程退出后调用
  pub(crate) fn collect(&mut self) -> String {
    match self.handle.take().map(JoinHandle::join) {
      Some(Ok(text)) => text,
      Some(Err(_)) => {
        warn!("错误输出读取线程异常退出");
        String::new()
      }
      None => String::new(),
    }
  }
}
