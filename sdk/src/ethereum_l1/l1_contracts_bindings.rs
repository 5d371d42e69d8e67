use alloy::sol;

sol!(
    #[allow(missing_docs)]
    #[sol(rpc)]
    interface IFlatDirectory {
        struct FileChunk {
            bytes name;
            uint256[] chunkIds;
        }

        function version() external view returns (string memory);
        function isSupportBlob() external view returns (bool);

        function getUploadInfo(bytes memory name)
            external
            view
            returns (uint8 mode, uint256 chunkCount, uint256 storageCost);
        function countChunks(bytes memory name) external view returns (uint256);
        function getChunkHashesBatch(FileChunk[] memory fileChunks)
            external
            view
            returns (bytes32[] memory);
        function readChunk(bytes memory name, uint256 chunkId)
            external
            view
            returns (bytes memory data, bool found);

        function writeChunksByBlobs(bytes memory name, uint256[] memory chunkIds, uint256[] memory sizes)
            external
            payable;
        function writeChunkByCalldata(bytes memory name, uint256 chunkId, bytes calldata data)
            external
            payable;
        function truncate(bytes memory name, uint256 chunkId) external;
        function remove(bytes memory name) external returns (uint256);
    }
);

sol!(
    #[allow(missing_docs)]
    #[sol(rpc)]
    interface IEthStorageKv {
        function upfrontPayment() external view returns (uint256);
        function putBlob(bytes32 key, uint256 blobIdx, uint256 length) external payable;
        function putBlobs(bytes32[] memory keys, uint256[] memory blobIdxs, uint256[] memory lengths)
            external
            payable;
        function size(bytes32 key) external view returns (uint256);
        function get(bytes32 key, uint8 decodeType, uint256 off, uint256 len)
            external
            view
            returns (bytes memory);
    }
);
